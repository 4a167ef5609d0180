use std::sync::Arc;
use tempfile::TempDir;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use vicinity_core::storage::IndexManager;
use vicinity_server::proto::vicinity_client::VicinityClient;
use vicinity_server::proto::vicinity_server::VicinityServer;
use vicinity_server::proto::{
    CreateIndexRequest, DeleteIndexRequest, FlushIndexRequest, IndicesRequest,
    InsertVectorRequest, InsertVectorWithIdRequest, SearchKnnRequest, SetEfRequest, SpaceType,
    Vector,
};
use vicinity_server::VicinityService;

async fn spawn_server() -> (VicinityClient<Channel>, TempDir) {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");

    let manager = Arc::new(IndexManager::new(tmp_dir.path()));
    manager.load_all().expect("Failed to load empty data root");
    let service = VicinityService::new(manager);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        Server::builder()
            .add_service(VicinityServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    let client = VicinityClient::connect(format!("http://{}", addr))
        .await
        .expect("Failed to connect");
    (client, tmp_dir)
}

fn create_request(name: &str, space: SpaceType, dim: u32, auto_id: bool) -> CreateIndexRequest {
    CreateIndexRequest {
        index_name: name.to_string(),
        space: space as i32,
        dim,
        capacity: 1000,
        m: 16,
        ef_construction: 200,
        seed: 42,
        auto_id,
    }
}

fn vector(values: &[f32]) -> Option<Vector> {
    Some(Vector {
        values: values.to_vec(),
    })
}

#[tokio::test]
async fn create_insert_search_cosine() {
    let (mut client, _tmp) = spawn_server().await;

    client
        .create_index(create_request("ix", SpaceType::Cosine, 5, true))
        .await
        .unwrap();

    let first = client
        .insert_vector(InsertVectorRequest {
            index_name: "ix".into(),
            vector: vector(&[0.1, 0.2, 0.3, 0.4, 0.5]),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(first.id, 1);

    let second = client
        .insert_vector(InsertVectorRequest {
            index_name: "ix".into(),
            vector: vector(&[0.9, 0.8, 0.7, 0.6, 0.5]),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(second.id, 2);

    let reply = client
        .search_knn(SearchKnnRequest {
            index_name: "ix".into(),
            vector: vector(&[0.1, 0.2, 0.3, 0.4, 0.5]),
            k: 2,
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(reply.hits.len(), 2);
    assert_eq!(reply.hits[0].id, 1);
    assert!(
        reply.hits[0].distance.abs() < 1e-6,
        "identical vector should be at ~0 distance, got {}",
        reply.hits[0].distance
    );
    assert_eq!(reply.hits[1].id, 2);
    assert!(reply.hits[1].distance > 0.0);
}

#[tokio::test]
async fn auto_id_and_explicit_id_modes_are_mutually_exclusive() {
    let (mut client, _tmp) = spawn_server().await;

    client
        .create_index(create_request("manual", SpaceType::L2, 3, false))
        .await
        .unwrap();

    // Auto-id insert on an explicit-id index must fail.
    let err = client
        .insert_vector(InsertVectorRequest {
            index_name: "manual".into(),
            vector: vector(&[1.0, 2.0, 3.0]),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    client
        .insert_vector_with_id(InsertVectorWithIdRequest {
            index_name: "manual".into(),
            id: 77,
            vector: vector(&[1.0, 2.0, 3.0]),
        })
        .await
        .unwrap();

    let reply = client
        .search_knn(SearchKnnRequest {
            index_name: "manual".into(),
            vector: vector(&[1.0, 2.0, 3.0]),
            k: 1,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.hits[0].id, 77);
}

#[tokio::test]
async fn streaming_insert_flushes_touched_indices() {
    let (mut client, tmp) = spawn_server().await;

    client
        .create_index(create_request("ix_a", SpaceType::L2, 2, true))
        .await
        .unwrap();
    client
        .create_index(create_request("ix_b", SpaceType::L2, 2, true))
        .await
        .unwrap();

    let requests = vec![
        InsertVectorRequest {
            index_name: "ix_a".into(),
            vector: vector(&[1.0, 0.0]),
        },
        InsertVectorRequest {
            index_name: "ix_a".into(),
            vector: vector(&[0.0, 1.0]),
        },
        InsertVectorRequest {
            index_name: "ix_b".into(),
            vector: vector(&[0.5, 0.5]),
        },
    ];
    let reply = client
        .insert_vectors(tokio_stream::iter(requests))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.ids, vec![1, 2, 1]);
    assert!(reply.took_ms >= 0);

    // Terminal flush leaves both indices CLEAN: snapshot present, no log.
    for name in ["ix_a", "ix_b"] {
        assert!(tmp.path().join(name).join("state").exists());
        assert!(tmp.path().join(name).join("index").exists());
        assert!(
            !tmp.path().join(name).join("log").exists(),
            "{name} should have no WAL after the terminal flush"
        );
    }

    // A fresh manager over the same data root sees identical results.
    let manager = IndexManager::new(tmp.path());
    manager.load_all().unwrap();
    let ix_a = manager.get("ix_a").unwrap();
    let hits = ix_a.search(&[1.0, 0.0], 2).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, 1);
}

#[tokio::test]
async fn streaming_insert_with_ids_flushes() {
    let (mut client, tmp) = spawn_server().await;

    client
        .create_index(create_request("ix", SpaceType::L2, 2, false))
        .await
        .unwrap();

    let requests = vec![
        InsertVectorWithIdRequest {
            index_name: "ix".into(),
            id: 10,
            vector: vector(&[1.0, 0.0]),
        },
        InsertVectorWithIdRequest {
            index_name: "ix".into(),
            id: 20,
            vector: vector(&[0.0, 1.0]),
        },
    ];
    client
        .insert_vectors_with_ids(tokio_stream::iter(requests))
        .await
        .unwrap();

    assert!(!tmp.path().join("ix").join("log").exists());

    let manager = IndexManager::new(tmp.path());
    manager.load_all().unwrap();
    let hits = manager.get("ix").unwrap().search(&[0.0, 1.0], 1).unwrap();
    assert_eq!(hits[0].id, 20);
}

#[tokio::test]
async fn streaming_insert_aborts_on_unknown_index() {
    let (mut client, tmp) = spawn_server().await;

    client
        .create_index(create_request("known", SpaceType::L2, 2, true))
        .await
        .unwrap();

    let requests = vec![
        InsertVectorRequest {
            index_name: "known".into(),
            vector: vector(&[1.0, 0.0]),
        },
        InsertVectorRequest {
            index_name: "ghost".into(),
            vector: vector(&[0.0, 1.0]),
        },
    ];
    let err = client
        .insert_vectors(tokio_stream::iter(requests))
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);

    // No terminal flush ran: the successful prefix is only in the WAL.
    assert!(tmp.path().join("known").join("log").exists());
}

#[tokio::test]
async fn indices_lists_created_indices() {
    let (mut client, _tmp) = spawn_server().await;

    client
        .create_index(create_request("alpha", SpaceType::L2, 2, true))
        .await
        .unwrap();
    client
        .create_index(create_request("beta", SpaceType::InnerProduct, 2, true))
        .await
        .unwrap();

    let mut names = client
        .indices(IndicesRequest {})
        .await
        .unwrap()
        .into_inner()
        .indices;
    names.sort();
    assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
}

#[tokio::test]
async fn delete_index_removes_name_and_directory() {
    let (mut client, tmp) = spawn_server().await;

    client
        .create_index(create_request("doomed", SpaceType::L2, 2, true))
        .await
        .unwrap();
    assert!(tmp.path().join("doomed").exists());

    client
        .delete_index(DeleteIndexRequest {
            index_name: "doomed".into(),
        })
        .await
        .unwrap();
    assert!(!tmp.path().join("doomed").exists());

    let err = client
        .delete_index(DeleteIndexRequest {
            index_name: "doomed".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);
}

#[tokio::test]
async fn duplicate_create_is_already_exists() {
    let (mut client, _tmp) = spawn_server().await;

    client
        .create_index(create_request("dup", SpaceType::L2, 2, true))
        .await
        .unwrap();
    let err = client
        .create_index(create_request("dup", SpaceType::L2, 2, true))
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::AlreadyExists);
}

#[tokio::test]
async fn invalid_space_and_name_are_rejected() {
    let (mut client, _tmp) = spawn_server().await;

    let err = client
        .create_index(CreateIndexRequest {
            space: SpaceType::Unspecified as i32,
            ..create_request("ok-name", SpaceType::L2, 2, true)
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    let err = client
        .create_index(create_request("bad name!", SpaceType::L2, 2, true))
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn search_against_missing_index_is_not_found() {
    let (mut client, _tmp) = spawn_server().await;

    let err = client
        .search_knn(SearchKnnRequest {
            index_name: "nowhere".into(),
            vector: vector(&[1.0]),
            k: 1,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);
}

#[tokio::test]
async fn dimension_mismatch_is_invalid_argument() {
    let (mut client, _tmp) = spawn_server().await;

    client
        .create_index(create_request("ix", SpaceType::L2, 4, true))
        .await
        .unwrap();
    let err = client
        .insert_vector(InsertVectorRequest {
            index_name: "ix".into(),
            vector: vector(&[1.0, 2.0]),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn set_ef_applies_and_persists_in_wal() {
    let (mut client, tmp) = spawn_server().await;

    client
        .create_index(create_request("tuned", SpaceType::L2, 2, true))
        .await
        .unwrap();
    client
        .set_ef(SetEfRequest {
            index_name: "tuned".into(),
            ef: 150,
        })
        .await
        .unwrap();

    let err = client
        .set_ef(SetEfRequest {
            index_name: "tuned".into(),
            ef: 0,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    // The setting was logged, so a restart replays it.
    let manager = IndexManager::new(tmp.path());
    manager.load_all().unwrap();
    drop(manager);
    assert!(tmp.path().join("tuned").join("log").exists());
}

#[tokio::test]
async fn flush_then_reload_roundtrips() {
    let (mut client, tmp) = spawn_server().await;

    client
        .create_index(create_request("durable", SpaceType::Cosine, 3, true))
        .await
        .unwrap();
    for values in [[0.1, 0.5, 0.9], [0.9, 0.5, 0.1], [0.3, 0.3, 0.3]] {
        client
            .insert_vector(InsertVectorRequest {
                index_name: "durable".into(),
                vector: vector(&values),
            })
            .await
            .unwrap();
    }
    client
        .flush_index(FlushIndexRequest {
            index_name: "durable".into(),
        })
        .await
        .unwrap();
    assert!(!tmp.path().join("durable").join("log").exists());

    let reply = client
        .search_knn(SearchKnnRequest {
            index_name: "durable".into(),
            vector: vector(&[0.1, 0.5, 0.9]),
            k: 3,
        })
        .await
        .unwrap()
        .into_inner();
    let served: Vec<u32> = reply.hits.iter().map(|h| h.id).collect();

    let manager = IndexManager::new(tmp.path());
    manager.load_all().unwrap();
    let reloaded: Vec<u32> = manager
        .get("durable")
        .unwrap()
        .search(&[0.1, 0.5, 0.9], 3)
        .unwrap()
        .iter()
        .map(|h| h.id)
        .collect();
    assert_eq!(served, reloaded);
}
