//! Boots the demo's `item_lookup` pipeline on a `portpicker`-chosen port
//! and drives it over a real socket with `reqwest`, the way the teacher's
//! gateway smoke-tests a running binary rather than only exercising its
//! `tower::Service` in-process.

use std::sync::Arc;
use std::time::Duration;

use http::Method;

use zerver_core::{
    slot, slot_set, Decision, Effect, EffectKind, Join, NoSlots, Pipeline, Priority, Response,
    RetryPolicy, Runtime, Step, ZerverConfig,
};
use zerver_effects::MemoryKvEffector;
use zerver_http::{Route, ZerverHttpConfig, ZerverServer};

slot!(ItemId: String, Record: serde_json::Value);
slot_set!(WritesItemId = [ItemId]);
slot_set!(ReadsItemId = [ItemId]);
slot_set!(WritesRecord = [Record]);
slot_set!(ReadsRecord = [Record]);

fn extract_id_step() -> Box<dyn zerver_core::step::DynStep> {
    Step::<NoSlots, WritesItemId>::new("extract_id", |view| {
        let Some(id) = view.base().param("id").filter(|id| !id.is_empty()) else {
            return Decision::Fail(zerver_core::Error::new(
                zerver_core::Kind::InvalidInput,
                "param",
                "id",
            ));
        };
        view.put::<ItemId>(id.to_string()).unwrap();
        Decision::Continue
    })
    .erase()
}

fn db_load_step() -> Box<dyn zerver_core::step::DynStep> {
    Step::<ReadsItemId, WritesRecord>::new("db_load", |view| {
        let id = view.require::<ItemId>().unwrap().clone();
        Decision::need(
            vec![Effect::new("load", EffectKind::Io, format!("get:item:{id}"))
                .read()
                .with_timeout(Duration::from_secs(2))
                .with_retry(RetryPolicy::DEFAULT)],
            Join::All,
            Box::new(move |ctx, outcomes| match &outcomes[0].result {
                Ok(bytes) => match serde_json::from_slice(bytes) {
                    Ok(value) => {
                        ctx.view::<NoSlots, WritesRecord>()
                            .put::<Record>(value)
                            .unwrap();
                        Decision::Continue
                    }
                    Err(_) => Decision::Fail(zerver_core::Error::internal("record", "decode")),
                },
                Err(err) => Decision::Fail(err.clone()),
            }),
        )
    })
    .erase()
}

fn render_step() -> Box<dyn zerver_core::step::DynStep> {
    Step::<ReadsRecord, NoSlots>::new("render", |view| {
        let record = view.require::<Record>().unwrap();
        match Response::json(200, record) {
            Ok(response) => Decision::Done(response),
            Err(err) => Decision::Fail(err),
        }
    })
    .erase()
}

fn item_lookup_pipeline() -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        "item_lookup",
        vec![extract_id_step(), db_load_step(), render_step()],
    ))
}

#[tokio::test]
async fn the_demo_pipeline_answers_a_seeded_lookup_over_a_real_socket() {
    use zerver_core::Effector;

    let port = portpicker::pick_unused_port().expect("a free port for the test server");
    let bind_addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

    let store = Arc::new(MemoryKvEffector::new());
    let put = Effect::new("seed", EffectKind::Io, "put:item:42").with_payload(bytes::Bytes::from(
        serde_json::json!({"id": "42", "name": "gadget"}).to_string(),
    ));
    store.execute(&put).await.expect("seed write succeeds");

    let runtime = Arc::new(
        Runtime::builder(ZerverConfig::default())
            .register_effector(store)
            .build(),
    );
    let server = ZerverServer::new(
        runtime,
        ZerverHttpConfig {
            bind_addr,
            ..ZerverHttpConfig::default()
        },
    )
    .route(Route::new(
        Method::GET,
        "/items/{id}",
        item_lookup_pipeline(),
        Priority::Interactive,
    ));

    let serving = tokio::spawn(server.serve());
    // Give the listener a moment to bind before the client dials it.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{bind_addr}/items/42"))
        .send()
        .await
        .expect("request reaches the bound listener");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("response body is JSON");
    assert_eq!(body["name"], "gadget");

    let missing = client
        .get(format!("http://{bind_addr}/items/missing"))
        .send()
        .await
        .expect("request reaches the bound listener");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    serving.abort();
}
