//! gRPC facade: translates RPCs into index-manager calls.
//!
//! Handlers are thin: validation, lookup, one engine call, error mapping.
//! The engine is synchronous; its calls run inline on the runtime worker,
//! wrapped in a panic guard that converts an escaping panic into an
//! `INTERNAL` status.
//!
//! The streaming inserts carry the one piece of real logic here: every
//! index touched by the stream is flushed when the client half-closes.

use crate::proto;
use crate::proto::vicinity_server::Vicinity;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status, Streaming};
use vicinity_core::config;
use vicinity_core::hnsw::SpaceKind;
use vicinity_core::storage::{DurableIndex, IndexConfig, IndexManager};
use vicinity_core::Error;

/// The `vicinity.v1.Vicinity` service implementation.
pub struct VicinityService {
    manager: Arc<IndexManager>,
}

impl VicinityService {
    pub fn new(manager: Arc<IndexManager>) -> Self {
        Self { manager }
    }

    fn index(&self, name: &str) -> Result<Arc<DurableIndex>, Status> {
        self.manager
            .get(name)
            .ok_or_else(|| Status::not_found(format!("index {name:?} not found")))
    }

    /// Flush every index a streaming insert touched, aggregating failures.
    fn flush_touched(&self, touched: &HashSet<String>) -> Result<(), Status> {
        let mut failures = Vec::new();
        for name in touched {
            if let Err(e) = self.manager.persist(name) {
                failures.push(format!("{name}: {e}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Status::internal(format!(
                "flush after streaming insert failed: {}",
                failures.join("; ")
            )))
        }
    }
}

fn status_from(err: Error) -> Status {
    match err {
        Error::InvalidArgument(msg) => Status::invalid_argument(msg),
        Error::NotFound(msg) => Status::not_found(msg),
        Error::AlreadyExists(msg) => Status::already_exists(msg),
        Error::Corruption(msg) => Status::data_loss(msg),
        Error::Io(e) => Status::internal(e.to_string()),
        Error::Internal(msg) => Status::internal(msg),
    }
}

fn space_kind(space: i32) -> Result<SpaceKind, Status> {
    match proto::SpaceType::try_from(space) {
        Ok(proto::SpaceType::L2) => Ok(SpaceKind::L2),
        Ok(proto::SpaceType::InnerProduct) => Ok(SpaceKind::InnerProduct),
        Ok(proto::SpaceType::Cosine) => Ok(SpaceKind::Cosine),
        _ => Err(Status::invalid_argument(format!(
            "invalid space type {space}"
        ))),
    }
}

fn vector_values(vector: Option<proto::Vector>) -> Result<Vec<f32>, Status> {
    vector
        .map(|v| v.values)
        .ok_or_else(|| Status::invalid_argument("vector is required"))
}

fn took_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

/// Run an engine call, converting a panic into an `INTERNAL` status.
fn catch_panic<T>(f: impl FnOnce() -> Result<T, Status>) -> Result<T, Status> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            tracing::error!(
                panic = %msg,
                backtrace = %std::backtrace::Backtrace::force_capture(),
                "panic in request handler"
            );
            Err(Status::internal(format!("panic: {msg}")))
        }
    }
}

#[tonic::async_trait]
impl Vicinity for VicinityService {
    async fn create_index(
        &self,
        request: Request<proto::CreateIndexRequest>,
    ) -> Result<Response<proto::CreateIndexResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(index = %req.index_name, "CreateIndex");

        let space = space_kind(req.space)?;
        let config = IndexConfig {
            space,
            dim: req.dim,
            capacity: req.capacity,
            m: req.m,
            ef_construction: req.ef_construction,
            seed: req.seed,
            auto_id: req.auto_id,
        };
        catch_panic(|| {
            self.manager
                .create(&req.index_name, config)
                .map_err(status_from)
        })?;
        Ok(Response::new(proto::CreateIndexResponse {}))
    }

    async fn delete_index(
        &self,
        request: Request<proto::DeleteIndexRequest>,
    ) -> Result<Response<proto::DeleteIndexResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(index = %req.index_name, "DeleteIndex");

        catch_panic(|| self.manager.delete(&req.index_name).map_err(status_from))?;
        Ok(Response::new(proto::DeleteIndexResponse {}))
    }

    async fn insert_vector(
        &self,
        request: Request<proto::InsertVectorRequest>,
    ) -> Result<Response<proto::InsertVectorResponse>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        tracing::debug!(index = %req.index_name, "InsertVector");

        let index = self.index(&req.index_name)?;
        let vector = vector_values(req.vector)?;
        let id = catch_panic(|| index.add_auto(&vector).map_err(status_from))?;
        Ok(Response::new(proto::InsertVectorResponse {
            id,
            took_ms: took_ms(started),
        }))
    }

    async fn insert_vector_with_id(
        &self,
        request: Request<proto::InsertVectorWithIdRequest>,
    ) -> Result<Response<proto::InsertVectorWithIdResponse>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        tracing::debug!(index = %req.index_name, id = req.id, "InsertVectorWithId");

        let index = self.index(&req.index_name)?;
        let vector = vector_values(req.vector)?;
        catch_panic(|| index.add_with_id(&vector, req.id).map_err(status_from))?;
        Ok(Response::new(proto::InsertVectorWithIdResponse {
            took_ms: took_ms(started),
        }))
    }

    async fn insert_vectors(
        &self,
        request: Request<Streaming<proto::InsertVectorRequest>>,
    ) -> Result<Response<proto::InsertVectorsResponse>, Status> {
        let started = Instant::now();
        tracing::debug!("InsertVectors stream opened");

        let mut stream = request.into_inner();
        let mut ids = Vec::new();
        let mut touched = HashSet::new();

        while let Some(req) = stream.message().await? {
            let index = self.index(&req.index_name)?;
            let vector = vector_values(req.vector)?;
            let id = catch_panic(|| index.add_auto(&vector).map_err(status_from))?;
            ids.push(id);
            touched.insert(req.index_name);
        }

        self.flush_touched(&touched)?;
        Ok(Response::new(proto::InsertVectorsResponse {
            ids,
            took_ms: took_ms(started),
        }))
    }

    async fn insert_vectors_with_ids(
        &self,
        request: Request<Streaming<proto::InsertVectorWithIdRequest>>,
    ) -> Result<Response<proto::InsertVectorsWithIdsResponse>, Status> {
        let started = Instant::now();
        tracing::debug!("InsertVectorsWithIds stream opened");

        let mut stream = request.into_inner();
        let mut touched = HashSet::new();

        while let Some(req) = stream.message().await? {
            let index = self.index(&req.index_name)?;
            let vector = vector_values(req.vector)?;
            catch_panic(|| index.add_with_id(&vector, req.id).map_err(status_from))?;
            touched.insert(req.index_name);
        }

        self.flush_touched(&touched)?;
        Ok(Response::new(proto::InsertVectorsWithIdsResponse {
            took_ms: took_ms(started),
        }))
    }

    async fn search_knn(
        &self,
        request: Request<proto::SearchKnnRequest>,
    ) -> Result<Response<proto::SearchKnnResponse>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        tracing::debug!(index = %req.index_name, k = req.k, "SearchKnn");

        if req.k > config::MAX_K {
            return Err(Status::invalid_argument(format!(
                "k {} exceeds the maximum of {}",
                req.k,
                config::MAX_K
            )));
        }
        let index = self.index(&req.index_name)?;
        let vector = vector_values(req.vector)?;
        let neighbors =
            catch_panic(|| index.search(&vector, req.k as usize).map_err(status_from))?;

        let hits = neighbors
            .into_iter()
            .map(|n| proto::Hit {
                id: n.id,
                distance: n.distance,
            })
            .collect();
        Ok(Response::new(proto::SearchKnnResponse {
            hits,
            took_ms: took_ms(started),
        }))
    }

    async fn flush_index(
        &self,
        request: Request<proto::FlushIndexRequest>,
    ) -> Result<Response<proto::FlushIndexResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(index = %req.index_name, "FlushIndex");

        catch_panic(|| self.manager.persist(&req.index_name).map_err(status_from))?;
        Ok(Response::new(proto::FlushIndexResponse {}))
    }

    async fn indices(
        &self,
        _request: Request<proto::IndicesRequest>,
    ) -> Result<Response<proto::IndicesResponse>, Status> {
        tracing::debug!("Indices");
        Ok(Response::new(proto::IndicesResponse {
            indices: self.manager.names(),
        }))
    }

    async fn set_ef(
        &self,
        request: Request<proto::SetEfRequest>,
    ) -> Result<Response<proto::SetEfResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(index = %req.index_name, ef = req.ef, "SetEf");

        let index = self.index(&req.index_name)?;
        catch_panic(|| index.set_ef(req.ef).map_err(status_from))?;
        Ok(Response::new(proto::SetEfResponse {}))
    }
}
