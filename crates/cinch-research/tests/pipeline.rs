//! End-to-end pipeline runs against scripted models and tools.

mod common;

use cinch_research::agent::knowledge::{JsonlKnowledgeStore, KnowledgeRecord};
use cinch_research::agent::notes::UnitOutcome;
use cinch_research::agent::supervisor::SupervisorStop;
use cinch_research::context::{ContextBudget, fit};
use cinch_research::model::FnModel;
use cinch_research::prelude::*;
use cinch_research::{ToolCall, json_schema_for};
use common::*;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const BRIEF: &str = "Compare 2023 and 2024 revenue of Company X";

fn no_clarify() -> ResearchConfig {
    ResearchConfig::default().with_allow_clarification(false)
}

fn report(outcome: ResearchOutcome) -> ResearchReport {
    match outcome {
        ResearchOutcome::Report(r) => r,
        ResearchOutcome::Clarification(q) => panic!("unexpected clarification: {q}"),
    }
}

/// Scripted replies: delegate `topics` once, researchers answer without
/// tools, and the report echoes its prompt.
fn scripted_reply(req: &CompletionRequest, topics: &[&str]) -> Result<ChatCompletion, ModelError> {
    match req.stage {
        CallStage::Clarify => Err(ModelError::Malformed("clarify should not run".into())),
        CallStage::Brief => Ok(ChatCompletion::text(BRIEF)),
        CallStage::Supervisor => Ok(delegate_then_complete(&req.messages, topics)),
        CallStage::Researcher => Ok(ChatCompletion::text("Nothing more to search.")),
        CallStage::Compress => Ok(ChatCompletion::text(format!(
            "Findings for {}",
            unit_topic(&req.messages)
        ))),
        CallStage::Report => Ok(ChatCompletion::text(format!(
            "# Report\n\n{}",
            req.messages[0].text()
        ))),
    }
}

/// [`scripted_reply`] with researcher turns sleeping for `delay(topic)`.
fn simple_model(topics: &'static [&'static str], delay: fn(&str) -> Duration) -> FnModel {
    FnModel::new(move |req: CompletionRequest| async move {
        if req.stage == CallStage::Researcher {
            tokio::time::sleep(delay(unit_topic(&req.messages))).await;
        }
        scripted_reply(&req, topics)
    })
}

fn no_delay(_: &str) -> Duration {
    Duration::ZERO
}

#[tokio::test]
async fn clarification_disabled_never_asks() {
    let clarify_calls = Arc::new(AtomicU32::new(0));
    let c = clarify_calls.clone();
    let model = FnModel::new(move |req: CompletionRequest| {
        if req.stage == CallStage::Clarify {
            c.fetch_add(1, Ordering::SeqCst);
        }
        async move {
            match req.stage {
                CallStage::Clarify => Ok(ChatCompletion::with_tool_calls(vec![ToolCall::function(
                    "c1",
                    "clarify_with_user",
                    r#"{"need_clarification":true,"question":"Which company?","verification":""}"#,
                )])),
                CallStage::Brief => Ok(ChatCompletion::text(BRIEF)),
                CallStage::Supervisor => Ok(ChatCompletion::with_tool_calls(vec![complete("c")])),
                _ => Ok(ChatCompletion::text("# Report")),
            }
        }
    });
    let tools = ToolSet::new();
    let config = no_clarify();

    let outcome = Pipeline::new(&model, &tools, &config)
        .run(vec![Message::user("Compare revenue")])
        .await
        .unwrap();
    let report = report(outcome);
    assert_eq!(report.brief, BRIEF);
    assert_eq!(report.stop, SupervisorStop::Done);
    assert_eq!(clarify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn clarification_enabled_returns_the_question() {
    let model = FnModel::new(|req: CompletionRequest| async move {
        match req.stage {
            CallStage::Clarify => Ok(ChatCompletion::with_tool_calls(vec![ToolCall::function(
                "c1",
                "clarify_with_user",
                r#"{"need_clarification":true,"question":"Which company?","verification":""}"#,
            )])),
            stage => Err(ModelError::Malformed(format!("{stage} should not run"))),
        }
    });
    let tools = ToolSet::new();
    let config = ResearchConfig::default();

    let outcome = Pipeline::new(&model, &tools, &config)
        .run(vec![Message::user("Compare revenue")])
        .await
        .unwrap();
    assert!(matches!(outcome, ResearchOutcome::Clarification(ref q) if q == "Which company?"));
}

#[tokio::test]
async fn concurrency_never_exceeds_the_cap() {
    static TOPICS: [&str; 5] = ["a", "b", "c", "d", "e"];
    let model = simple_model(&TOPICS, |_| Duration::from_millis(40));
    let tools = ToolSet::new();
    let config = no_clarify().with_max_concurrent_research_units(2);
    let gauge = ConcurrencyGauge::default();

    let report = report(
        Pipeline::new(&model, &tools, &config)
            .with_event_handler(&gauge)
            .run(vec![Message::user(BRIEF)])
            .await
            .unwrap(),
    );
    assert_eq!(report.notes.len(), 5);
    assert!(gauge.peak() <= 2, "peak concurrency {}", gauge.peak());
    assert_eq!(gauge.peak(), 2);
}

#[tokio::test]
async fn notes_follow_issuance_order_not_completion_order() {
    static TOPICS: [&str; 2] = ["slow topic", "fast topic"];
    let model = simple_model(&TOPICS, |topic| {
        if topic.starts_with("slow") {
            Duration::from_millis(200)
        } else {
            Duration::ZERO
        }
    });
    let tools = ToolSet::new();
    let config = no_clarify();
    let gauge = ConcurrencyGauge::default();

    let report = report(
        Pipeline::new(&model, &tools, &config)
            .with_event_handler(&gauge)
            .run(vec![Message::user(BRIEF)])
            .await
            .unwrap(),
    );
    assert_eq!(gauge.finished(), vec![1, 0]);
    let topics: Vec<&str> = report.notes.iter().map(|n| n.topic.as_str()).collect();
    assert_eq!(topics, ["slow topic", "fast topic"]);
    assert_eq!(report.notes[0].findings(), Some("Findings for slow topic"));
}

#[tokio::test]
async fn iteration_ceiling_of_one_allows_one_planning_turn() {
    let planning_turns = Arc::new(AtomicU32::new(0));
    let p = planning_turns.clone();
    let model = FnModel::new(move |req: CompletionRequest| {
        if req.stage == CallStage::Supervisor {
            p.fetch_add(1, Ordering::SeqCst);
        }
        async move {
            match req.stage {
                CallStage::Brief => Ok(ChatCompletion::text(BRIEF)),
                // Never completes on its own.
                CallStage::Supervisor => Ok(ChatCompletion::with_tool_calls(vec![delegate(
                    "d",
                    "another angle",
                )])),
                _ => Ok(ChatCompletion::text("text")),
            }
        }
    });
    let tools = ToolSet::new();
    let config = no_clarify().with_max_supervisor_iterations(1);

    let report = report(
        Pipeline::new(&model, &tools, &config)
            .run(vec![Message::user(BRIEF)])
            .await
            .unwrap(),
    );
    assert_eq!(report.iterations, 1);
    assert_eq!(report.stop, SupervisorStop::IterationCeiling);
    assert_eq!(report.notes.len(), 1);
    assert_eq!(planning_turns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_tool_ceiling_compresses_from_the_topic_alone() {
    static TOPICS: [&str; 1] = ["2023 revenue of X"];
    let compress_inputs = Arc::new(Mutex::new(Vec::new()));
    let researcher_calls = Arc::new(AtomicU32::new(0));
    let (ci, rc) = (compress_inputs.clone(), researcher_calls.clone());
    let model = FnModel::new(move |req: CompletionRequest| {
        match req.stage {
            CallStage::Compress => ci.lock().unwrap().push(req.messages.clone()),
            CallStage::Researcher => {
                rc.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        async move {
            match req.stage {
                CallStage::Brief => Ok(ChatCompletion::text(BRIEF)),
                CallStage::Supervisor => Ok(delegate_then_complete(&req.messages, &TOPICS)),
                CallStage::Compress => Ok(ChatCompletion::text("Nothing gathered yet.")),
                _ => Ok(ChatCompletion::text("# Report")),
            }
        }
    });
    let tool_calls = Arc::new(AtomicU32::new(0));
    let t = tool_calls.clone();
    let tools = ToolSet::new().with(FnTool::new(
        ToolDef::new("lookup", "lookup", serde_json::json!({"type": "object"})),
        move |_: serde_json::Value| {
            t.fetch_add(1, Ordering::SeqCst);
            async { Ok("data".to_string()) }
        },
    ));
    let config = no_clarify().with_max_tool_calls_per_unit(0);

    let report = report(
        Pipeline::new(&model, &tools, &config)
            .run(vec![Message::user(BRIEF)])
            .await
            .unwrap(),
    );
    assert_eq!(researcher_calls.load(Ordering::SeqCst), 0);
    assert_eq!(tool_calls.load(Ordering::SeqCst), 0);
    let inputs = compress_inputs.lock().unwrap();
    assert_eq!(inputs.len(), 1);
    assert!(observations(&inputs[0]).is_empty());
    assert_eq!(unit_topic(&inputs[0]), "2023 revenue of X");
    assert!(matches!(
        report.notes[0].outcome,
        UnitOutcome::Findings { tool_calls: 0, ceiling_reached: true, .. }
    ));
}

#[test]
fn fit_is_idempotent() {
    let mut messages = vec![Message::system("You research."), Message::user(BRIEF)];
    for i in 0..20 {
        let id = format!("call_{i}");
        messages.push(Message::assistant_tool_calls(
            None,
            vec![ToolCall::function(&id, "web_search", r#"{"queries":["x revenue"]}"#)],
        ));
        messages.push(Message::tool_result(&id, format!("result {i} ").repeat(200)));
    }
    let budget = ContextBudget::new(4_000).with_keep_recent(4);

    let once = fit(&messages, &budget).unwrap();
    let twice = fit(&once, &budget).unwrap();
    assert_eq!(once, twice);
    assert!(budget.fits(&once));
    assert_eq!(once[..2], messages[..2]);
    assert_eq!(once.last(), messages.last());
}

#[derive(Deserialize, JsonSchema)]
struct RevenueArgs {
    /// Fiscal year.
    year: u32,
}

fn revenue_tool(calls: Arc<AtomicU32>, flaky_2024: Arc<AtomicBool>) -> FnTool {
    FnTool::new(
        ToolDef::new(
            "company_revenue",
            "Annual revenue of Company X",
            json_schema_for::<RevenueArgs>(),
        ),
        move |args: RevenueArgs| {
            calls.fetch_add(1, Ordering::SeqCst);
            let fail = args.year == 2024 && flaky_2024.swap(false, Ordering::SeqCst);
            async move {
                if fail {
                    return Err(ToolError::Failed("HTTP 503: temporarily unavailable".into()));
                }
                let figure = if args.year == 2023 { "$10.0B" } else { "$12.5B" };
                Ok(format!("Company X revenue in {} was {figure}", args.year))
            }
        },
    )
}

/// Researchers call the revenue tool until one call succeeds, then stop.
fn revenue_model() -> FnModel {
    static TOPICS: [&str; 2] = ["2023 revenue of X", "2024 revenue of X"];
    FnModel::new(|req: CompletionRequest| async move {
        match req.stage {
            CallStage::Brief => Ok(ChatCompletion::text(BRIEF)),
            CallStage::Supervisor => Ok(delegate_then_complete(&req.messages, &TOPICS)),
            CallStage::Researcher => {
                let seen = observations(&req.messages);
                match seen.last() {
                    Some(last) if !last.starts_with("Error") => {
                        Ok(ChatCompletion::text("Enough gathered."))
                    }
                    _ => {
                        let year = if unit_topic(&req.messages).contains("2023") { 2023 } else { 2024 };
                        Ok(ChatCompletion::with_tool_calls(vec![ToolCall::function(
                            format!("r{}", seen.len()),
                            "company_revenue",
                            format!(r#"{{"year":{year}}}"#),
                        )]))
                    }
                }
            }
            CallStage::Compress => {
                let facts: Vec<&str> = observations(&req.messages)
                    .into_iter()
                    .filter(|o| !o.starts_with("Error"))
                    .collect();
                Ok(ChatCompletion::text(facts.join("\n")))
            }
            CallStage::Report => Ok(ChatCompletion::text(format!(
                "# Revenue of Company X\n\n{}",
                req.messages[0].text()
            ))),
            CallStage::Clarify => Err(ModelError::Malformed("clarify should not run".into())),
        }
    })
}

#[tokio::test]
async fn revenue_comparison_end_to_end() {
    let calls = Arc::new(AtomicU32::new(0));
    let tools = ToolSet::new().with(revenue_tool(calls.clone(), Arc::new(AtomicBool::new(true))));
    let model = revenue_model();
    let config = no_clarify().with_max_concurrent_research_units(2);

    let report = report(
        Pipeline::new(&model, &tools, &config)
            .run(vec![Message::user(BRIEF)])
            .await
            .unwrap(),
    );

    assert_eq!(report.stop, SupervisorStop::Done);
    assert_eq!(report.iterations, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.notes.len(), 2);
    assert!(report.notes.iter().all(|n| !n.is_failure()));
    assert_eq!(report.notes[0].topic, "2023 revenue of X");
    assert!(report.notes[1].findings().unwrap().contains("$12.5B"));
    assert!(report.report.contains("$10.0B"));
    assert!(report.report.contains("$12.5B"));
}

#[tokio::test]
async fn always_overflowing_report_carries_every_note() {
    static TOPICS: [&str; 4] = ["q1", "q2", "q3", "q4"];
    let report_calls = Arc::new(AtomicU32::new(0));
    let r = report_calls.clone();
    let model = FnModel::new(move |req: CompletionRequest| {
        let result = if req.stage == CallStage::Report {
            r.fetch_add(1, Ordering::SeqCst);
            Err(ModelError::ContextOverflow("maximum context length exceeded".into()))
        } else {
            scripted_reply(&req, &TOPICS)
        };
        async move { result }
    });
    let tools = ToolSet::new();
    let config = no_clarify().with_report_fallback_attempts(2);

    let err = Pipeline::new(&model, &tools, &config)
        .run(vec![Message::user(BRIEF)])
        .await
        .unwrap_err();
    let ResearchError::Report(err) = err else {
        panic!("expected a report error, got {err:?}");
    };
    assert_eq!(err.attempts, 3);
    assert_eq!(report_calls.load(Ordering::SeqCst), 3);
    let topics: Vec<&str> = err.notes.iter().map(|n| n.topic.as_str()).collect();
    assert_eq!(topics, TOPICS);
    let degraded = err.degraded_report();
    assert!(degraded.contains("Findings for q1"));
    assert!(degraded.contains("Findings for q4"));
}

#[tokio::test]
async fn single_topic_report_cuts_findings_on_each_fallback() {
    static TOPICS: [&str; 1] = ["FY2024 revenue"];
    let report_prompts = Arc::new(Mutex::new(Vec::new()));
    let r = report_prompts.clone();
    let model = FnModel::new(move |req: CompletionRequest| {
        let result = match req.stage {
            CallStage::Report => {
                r.lock().unwrap().push(req.messages[0].text().len());
                Err(ModelError::ContextOverflow("maximum context length exceeded".into()))
            }
            CallStage::Compress => Ok(ChatCompletion::text("Revenue was $12.5B. ".repeat(50))),
            _ => scripted_reply(&req, &TOPICS),
        };
        async move { result }
    });
    let tools = ToolSet::new();
    let config = no_clarify().with_report_fallback_attempts(3);

    let err = Pipeline::new(&model, &tools, &config)
        .run(vec![Message::user(BRIEF)])
        .await
        .unwrap_err();
    let ResearchError::Report(err) = err else {
        panic!("expected a report error, got {err:?}");
    };
    assert_eq!(err.attempts, 4);
    assert_eq!(err.notes.len(), 1);
    let lens = report_prompts.lock().unwrap();
    assert_eq!(lens.len(), 4);
    assert!(lens.windows(2).all(|w| w[1] < w[0]), "prompt lengths {lens:?}");
}

#[tokio::test]
async fn supervisor_overflow_degrades_but_still_reports() {
    let supervisor_calls = Arc::new(AtomicU32::new(0));
    let s = supervisor_calls.clone();
    let model = FnModel::new(move |req: CompletionRequest| {
        let result = if req.stage == CallStage::Supervisor {
            s.fetch_add(1, Ordering::SeqCst);
            Err(ModelError::ContextOverflow("maximum context length exceeded".into()))
        } else {
            scripted_reply(&req, &[])
        };
        async move { result }
    });
    let tools = ToolSet::new();
    let config = no_clarify();

    let report = report(
        Pipeline::new(&model, &tools, &config)
            .run(vec![Message::user(BRIEF)])
            .await
            .unwrap(),
    );
    assert!(
        matches!(report.stop, SupervisorStop::Degraded(_)),
        "stop was {:?}",
        report.stop
    );
    assert!(report.report.starts_with("# Report"));
    assert!(report.notes.is_empty());
    assert!(supervisor_calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn cancellation_stops_in_flight_units() {
    static TOPICS: [&str; 2] = ["a", "b"];
    let model = simple_model(&TOPICS, |_| Duration::from_secs(30));
    let tools = ToolSet::new();
    let config = no_clarify();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        Pipeline::new(&model, &tools, &config)
            .with_cancellation(cancel)
            .run(vec![Message::user(BRIEF)]),
    )
    .await
    .expect("cancellation should end the run promptly");
    assert!(matches!(result, Err(ResearchError::Cancelled(_))));
}

#[tokio::test]
async fn integrated_findings_reach_the_knowledge_store() {
    static TOPICS: [&str; 2] = ["2023 revenue of X", "2024 revenue of X"];
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("findings.jsonl");
    let model = simple_model(&TOPICS, no_delay);
    let tools = ToolSet::new();
    let config = no_clarify();

    let report = report(
        Pipeline::new(&model, &tools, &config)
            .with_knowledge_store(Arc::new(JsonlKnowledgeStore::new(&path)))
            .run(vec![Message::user(BRIEF)])
            .await
            .unwrap(),
    );

    let records: Vec<KnowledgeRecord> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.run_id == report.trace_id));
    let mut topics: Vec<&str> = records.iter().map(|r| r.topic.as_str()).collect();
    topics.sort();
    assert_eq!(topics, TOPICS);
}
