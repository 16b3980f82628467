//! End-to-end scenarios exercising the public API surface together:
//! context, decision, effect dispatch, join, retry, and the runtime's
//! `handle_request` entry point.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use zerver_core::config::ZerverConfig;
use zerver_core::context::request::{HeaderEntry, ParsedRequest};
use zerver_core::effect::{Effect, EffectKind, RetryPolicy};
use zerver_core::error::{Error, Kind};
use zerver_core::scheduler::Priority;
use zerver_core::{
    slot, slot_set, BudgetConfig, Decision, Effector, Join, NoSlots, Pipeline, Response, Runtime,
    Step,
};

slot!(ItemId: String, Record: serde_json::Value, Rendered: String);
slot_set!(ReadsItemId = [ItemId]);
slot_set!(WritesItemId = [ItemId]);
slot_set!(ReadsRecord = [Record]);
slot_set!(WritesRecord = [Record]);
slot_set!(ReadsRendered = [Rendered]);
slot_set!(WritesRendered = [Rendered]);

fn request(path: &str) -> ParsedRequest {
    let mut path_params = std::collections::HashMap::new();
    path_params.insert("id".to_string(), "42".to_string());
    ParsedRequest {
        method: "GET".into(),
        path: path.into(),
        headers: vec![HeaderEntry {
            name: "Accept".into(),
            value: "application/json".into(),
        }],
        path_params,
        query_params: Default::default(),
        client_addr: None,
        body: bytes::Bytes::new(),
    }
}

struct InMemoryStore {
    records: Mutex<std::collections::HashMap<String, serde_json::Value>>,
    upstream_failures_remaining: Mutex<u32>,
}

#[async_trait]
impl Effector for InMemoryStore {
    fn supports(&self, effect: &Effect) -> bool {
        effect.target.starts_with("record:")
    }

    async fn execute(&self, effect: &Effect) -> Result<bytes::Bytes, Error> {
        let mut remaining = self.upstream_failures_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(Error::new(Kind::UpstreamUnavailable, "effect", effect.target.clone()));
        }
        drop(remaining);

        let key = effect.target.trim_start_matches("record:");
        let records = self.records.lock().unwrap();
        match records.get(key) {
            Some(value) => Ok(bytes::Bytes::from(value.to_string())),
            None => Err(Error::new(Kind::NotFound, "record", key)),
        }
    }

    fn kinds(&self) -> &'static [EffectKind] {
        &[EffectKind::Io]
    }
}

fn extract_id_step() -> Box<dyn zerver_core::step::DynStep> {
    Step::<NoSlots, WritesItemId>::new("extract_id", |view| {
        let id = view.base().param("id").unwrap_or_default().to_string();
        if id.is_empty() {
            return Decision::Fail(Error::new(Kind::InvalidInput, "param", "id"));
        }
        view.put::<ItemId>(id).unwrap();
        Decision::Continue
    })
    .erase()
}

fn db_load_step() -> Box<dyn zerver_core::step::DynStep> {
    Step::<ReadsItemId, WritesRecord>::new("db_load", |view| {
        let id = view.require::<ItemId>().unwrap().clone();
        Decision::need(
            vec![Effect::new("load", EffectKind::Io, format!("record:{id}"))
                .read()
                .with_timeout(Duration::from_secs(2))
                .with_retry(RetryPolicy {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    jitter: 0.0,
                })],
            Join::All,
            Box::new(move |ctx, outcomes| match &outcomes[0].result {
                Ok(bytes) => {
                    let value: serde_json::Value = serde_json::from_slice(bytes).unwrap();
                    ctx.view::<NoSlots, WritesRecord>()
                        .put::<Record>(value)
                        .unwrap();
                    Decision::Continue
                }
                Err(err) => Decision::Fail(err.clone()),
            }),
        )
    })
    .erase()
}

fn render_step() -> Box<dyn zerver_core::step::DynStep> {
    Step::<ReadsRecord, WritesRendered>::new("render", |view| {
        let record = view.require::<Record>().unwrap();
        let rendered = view.base().to_json(record).unwrap().to_string();
        view.put::<Rendered>(rendered.clone()).unwrap();
        Decision::Done(Response::text(200, rendered))
    })
    .erase()
}

fn pipeline() -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        "item_lookup",
        vec![extract_id_step(), db_load_step(), render_step()],
    ))
}

#[tokio::test]
async fn happy_path_loads_and_renders_a_record() {
    let mut records = std::collections::HashMap::new();
    records.insert("42".to_string(), serde_json::json!({"id": "42", "name": "widget"}));
    let store = Arc::new(InMemoryStore {
        records: Mutex::new(records),
        upstream_failures_remaining: Mutex::new(0),
    });

    let runtime = Runtime::builder(ZerverConfig::default())
        .register_effector(store)
        .build();

    let outcome = runtime
        .handle_request(request("/items/42"), pipeline(), Priority::Interactive)
        .await;
    assert_eq!(outcome.response.status, 200);
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn missing_record_fails_with_not_found() {
    let store = Arc::new(InMemoryStore {
        records: Mutex::new(std::collections::HashMap::new()),
        upstream_failures_remaining: Mutex::new(0),
    });

    let runtime = Runtime::builder(ZerverConfig::default())
        .register_effector(store)
        .build();

    let outcome = runtime
        .handle_request(request("/items/42"), pipeline(), Priority::Default)
        .await;
    assert_eq!(outcome.response.status, 404);
    assert_eq!(outcome.error.unwrap().kind, Kind::NotFound);
}

#[tokio::test]
async fn transient_upstream_failure_is_retried_and_succeeds() {
    let mut records = std::collections::HashMap::new();
    records.insert("42".to_string(), serde_json::json!({"id": "42"}));
    let store = Arc::new(InMemoryStore {
        records: Mutex::new(records),
        upstream_failures_remaining: Mutex::new(2),
    });

    let runtime = Runtime::builder(ZerverConfig::default())
        .register_effector(store)
        .build();

    let outcome = runtime
        .handle_request(request("/items/42"), pipeline(), Priority::Batch)
        .await;
    assert_eq!(outcome.response.status, 200);
    assert!(outcome.error.is_none());
}

fn rendered_response_step() -> Box<dyn zerver_core::step::DynStep> {
    Step::<ReadsRendered, NoSlots>::new("rendered_response", |view| {
        let rendered = view.require::<Rendered>().unwrap().clone();
        Decision::Done(Response::text(200, rendered))
    })
    .erase()
}

fn dual_required_step() -> Box<dyn zerver_core::step::DynStep> {
    Step::<ReadsItemId, WritesRendered>::new("load_required_and_optional", |view| {
        let id = view.require::<ItemId>().unwrap().clone();
        Decision::need(
            vec![
                Effect::new("required", EffectKind::Io, format!("record:{id}")).read(),
                Effect::new("optional", EffectKind::Io, "record:missing")
                    .read()
                    .required(false),
            ],
            Join::AllRequired,
            Box::new(move |ctx, outcomes| {
                let required = outcomes.iter().find(|o| o.token == "required").unwrap();
                match &required.result {
                    Ok(bytes) => {
                        let value: serde_json::Value = serde_json::from_slice(bytes).unwrap();
                        ctx.view::<NoSlots, WritesRendered>()
                            .put::<Rendered>(value.to_string())
                            .unwrap();
                        Decision::Continue
                    }
                    Err(err) => Decision::Fail(err.clone()),
                }
            }),
        )
    })
    .erase()
}

fn all_required_pipeline() -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        "all_required_demo",
        vec![extract_id_step(), dual_required_step(), rendered_response_step()],
    ))
}

#[tokio::test]
async fn parallel_all_required_resumes_once_required_effects_complete_despite_an_optional_failure() {
    // `spec.md` §8 scenario 2: a parallel `Join::AllRequired` `Need` with
    // one required effect and one optional effect that fails resolves
    // successfully once the required effect completes, ignoring the
    // optional failure entirely.
    let mut records = std::collections::HashMap::new();
    records.insert("42".to_string(), serde_json::json!({"id": "42", "name": "widget"}));
    let store = Arc::new(InMemoryStore {
        records: Mutex::new(records),
        upstream_failures_remaining: Mutex::new(0),
    });
    let runtime = Runtime::builder(ZerverConfig::default())
        .register_effector(store)
        .build();

    let outcome = runtime
        .handle_request(request("/items/42"), all_required_pipeline(), Priority::Interactive)
        .await;
    assert_eq!(outcome.response.status, 200);
    assert!(outcome.error.is_none());
}

struct DualSpeedStore {
    slow_delay: Duration,
}

#[async_trait]
impl Effector for DualSpeedStore {
    fn supports(&self, effect: &Effect) -> bool {
        effect.target == "fast" || effect.target == "slow"
    }

    async fn execute(&self, effect: &Effect) -> Result<bytes::Bytes, Error> {
        if effect.target == "slow" {
            tokio::time::sleep(self.slow_delay).await;
        }
        Ok(bytes::Bytes::from_static(br#"{"ok":true}"#))
    }

    fn kinds(&self) -> &'static [EffectKind] {
        &[EffectKind::Io]
    }
}

fn first_success_step() -> Box<dyn zerver_core::step::DynStep> {
    Step::<ReadsItemId, WritesRendered>::new("first_success_probe", |view| {
        Decision::need(
            vec![
                Effect::new("fast", EffectKind::Io, "fast").read(),
                Effect::new("slow", EffectKind::Io, "slow").read(),
            ],
            Join::FirstSuccess,
            Box::new(move |ctx, outcomes| {
                let winner = outcomes.iter().find(|o| o.is_success()).unwrap();
                let rendered = String::from_utf8_lossy(winner.result.as_ref().unwrap()).to_string();
                ctx.view::<NoSlots, WritesRendered>()
                    .put::<Rendered>(rendered)
                    .unwrap();
                Decision::Continue
            }),
        )
    })
    .erase()
}

fn first_success_pipeline() -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        "first_success_demo",
        vec![extract_id_step(), first_success_step(), rendered_response_step()],
    ))
}

#[tokio::test]
async fn first_success_short_circuits_without_waiting_for_the_slower_sibling() {
    // `spec.md` §8 scenario 3: a parallel `Join::FirstSuccess` `Need`
    // resolves as soon as its first success arrives, cancelling the
    // still-outstanding sibling rather than waiting for it to finish.
    let store = Arc::new(DualSpeedStore {
        slow_delay: Duration::from_millis(300),
    });
    let runtime = Runtime::builder(ZerverConfig::default())
        .register_effector(store)
        .build();

    let started = std::time::Instant::now();
    let outcome = runtime
        .handle_request(request("/items/42"), first_success_pipeline(), Priority::Interactive)
        .await;
    assert_eq!(outcome.response.status, 200);
    assert!(outcome.error.is_none());
    assert!(
        started.elapsed() < Duration::from_millis(150),
        "first_success should resolve without waiting on the slower sibling effect"
    );
}

struct SlowStore {
    delay: Duration,
}

#[async_trait]
impl Effector for SlowStore {
    fn supports(&self, effect: &Effect) -> bool {
        effect.target.starts_with("record:")
    }

    async fn execute(&self, effect: &Effect) -> Result<bytes::Bytes, Error> {
        tokio::time::sleep(self.delay).await;
        Ok(bytes::Bytes::from(
            serde_json::json!({"id": effect.target}).to_string(),
        ))
    }

    fn kinds(&self) -> &'static [EffectKind] {
        &[EffectKind::Io]
    }
}

#[tokio::test]
async fn request_deadline_expiry_fails_a_request_stuck_in_a_slow_effect() {
    let store = Arc::new(SlowStore {
        delay: Duration::from_millis(200),
    });
    let config = ZerverConfig {
        default_deadline: Some(Duration::from_millis(20)),
        ..ZerverConfig::default()
    };
    let runtime = Runtime::builder(config).register_effector(store).build();

    let outcome = runtime
        .handle_request(request("/items/42"), pipeline(), Priority::Interactive)
        .await;
    assert_eq!(outcome.response.status, 504);
    assert_eq!(outcome.error.unwrap().kind, Kind::Timeout);
}

struct InstantComputeEffector;

#[async_trait]
impl Effector for InstantComputeEffector {
    fn supports(&self, effect: &Effect) -> bool {
        effect.target == "square"
    }

    async fn execute(&self, _effect: &Effect) -> Result<bytes::Bytes, Error> {
        Ok(bytes::Bytes::from_static(br#"{"result":1764}"#))
    }

    fn kinds(&self) -> &'static [EffectKind] {
        &[EffectKind::Compute]
    }
}

fn compute_step() -> Box<dyn zerver_core::step::DynStep> {
    Step::<ReadsItemId, WritesRendered>::new("compute_square", |view| {
        Decision::need(
            vec![Effect::new("square", EffectKind::Compute, "square")
                .read()
                .with_timeout(Duration::from_secs(2))],
            Join::All,
            Box::new(move |ctx, outcomes| match &outcomes[0].result {
                Ok(bytes) => {
                    let rendered = String::from_utf8_lossy(bytes).to_string();
                    ctx.view::<NoSlots, WritesRendered>()
                        .put::<Rendered>(rendered)
                        .unwrap();
                    Decision::Continue
                }
                Err(err) => Decision::Fail(err.clone()),
            }),
        )
    })
    .erase()
}

fn compute_pipeline() -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        "compute_budget_demo",
        vec![extract_id_step(), compute_step(), rendered_response_step()],
    ))
}

#[tokio::test]
async fn compute_task_parks_on_an_oversized_ask_and_resumes_at_a_smaller_one() {
    // `spec.md` §8 scenario 6: a compute task whose default ask exceeds
    // the request's whole budget is parked at registration rather than
    // rejected outright, and the dispatcher's admission loop backs its
    // ask off until a later attempt fits, resuming the effect instead of
    // failing the request.
    let config = ZerverConfig {
        budget: BudgetConfig {
            max_request_cpu: Duration::from_millis(50),
            max_task_cpu: Duration::from_millis(80),
            enforce: true,
            park_on_exceeded: true,
            ..BudgetConfig::default()
        },
        ..ZerverConfig::default()
    };
    let runtime = Runtime::builder(config)
        .register_effector(Arc::new(InstantComputeEffector))
        .build();

    let outcome = runtime
        .handle_request(request("/items/42"), compute_pipeline(), Priority::Interactive)
        .await;
    assert_eq!(outcome.response.status, 200);
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn missing_path_param_fails_before_any_effect_dispatches() {
    let store = Arc::new(InMemoryStore {
        records: Mutex::new(std::collections::HashMap::new()),
        upstream_failures_remaining: Mutex::new(0),
    });
    let runtime = Runtime::builder(ZerverConfig::default())
        .register_effector(store)
        .build();

    let mut req = request("/items/");
    req.path_params.clear();
    let outcome = runtime
        .handle_request(req, pipeline(), Priority::Interactive)
        .await;
    assert_eq!(outcome.response.status, 400);
    assert_eq!(outcome.error.unwrap().kind, Kind::InvalidInput);
}
