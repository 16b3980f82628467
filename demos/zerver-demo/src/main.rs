//! A runnable `zerver` service: the `extract_id` → `db_load` → `render`
//! pipeline from `spec.md` §8 scenario 1, wired onto `zerver-http` and a
//! seeded `zerver_effects::MemoryKvEffector`. Grounded on the teacher's
//! `smg`/`amg` binaries: a `clap` `derive`+`env` CLI, `tokio::main`, and
//! `tracing-subscriber` installed first thing in `main`.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use http::Method;

use zerver_core::{
    slot, slot_set, Decision, Effect, EffectKind, Join, NoSlots, Pipeline, Response, RetryPolicy,
    Runtime, Step, ZerverConfig,
};
use zerver_effects::MemoryKvEffector;
use zerver_http::{Route, ZerverHttpConfig, ZerverServer};

/// Minimal CLI surface for the demo, matching the teacher's `derive`+`env`
/// `clap` convention so every flag also has an environment-variable
/// fallback (`ZERVER_DEMO_BIND`, ...).
#[derive(Parser, Debug)]
#[command(name = "zerver-demo", about = "Runnable zerver example service")]
struct Args {
    /// Address to bind the HTTP listener on.
    #[arg(long, env = "ZERVER_DEMO_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// `tracing_subscriber::EnvFilter` directive string.
    #[arg(long, env = "ZERVER_DEMO_LOG", default_value = "zerver_demo=info,zerver_core=info,zerver_http=info")]
    log_filter: String,
}

slot!(ItemId: String, Record: serde_json::Value, Rendered: String);
slot_set!(ReadsItemId = [ItemId]);
slot_set!(WritesItemId = [ItemId]);
slot_set!(ReadsRecord = [Record]);
slot_set!(WritesRecord = [Record]);

/// Reads the `{id}` path parameter, per `spec.md` §8 scenario 1's
/// `extract_id` step. Fails with `InvalidInput` if the route matched
/// without one, which should never happen given the route table below but
/// is cheap to guard anyway since a step is never allowed to panic.
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

/// Issues one required KV-read effect for the item and stores its decoded
/// JSON into `Record`, per `spec.md` §8 scenario 1's `db_load` step.
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

/// Renders the loaded record as the response body, per `spec.md` §8
/// scenario 1's `render` step.
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

/// Seeds the in-memory store with a couple of records so the demo has
/// something to return out of the box.
async fn seed(store: &MemoryKvEffector) {
    use zerver_core::Effector;

    for (id, name) in [("1", "widget"), ("42", "gadget")] {
        let put = Effect::new(
            "seed",
            EffectKind::Io,
            format!("put:item:{id}"),
        )
        .with_payload(bytes::Bytes::from(
            serde_json::json!({"id": id, "name": name}).to_string(),
        ))
        .with_timeout(Duration::from_secs(1));
        let _ = store.execute(&put).await;
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let http_config = ZerverHttpConfig {
        bind_addr: args.bind.parse().expect("ZERVER_DEMO_BIND must be a valid socket address"),
        tracing_env_filter: args.log_filter,
        ..ZerverHttpConfig::default()
    };
    zerver_http::init_tracing(&http_config);

    let store = Arc::new(MemoryKvEffector::new());
    seed(&store).await;

    let runtime = Arc::new(
        Runtime::builder(ZerverConfig::default())
            .register_effector(store)
            .build(),
    );

    let server = ZerverServer::new(runtime, http_config).route(Route::new(
        Method::GET,
        "/items/{id}",
        item_lookup_pipeline(),
        zerver_core::Priority::Interactive,
    ));

    tracing::info!("zerver-demo starting");
    server.serve().await
}
