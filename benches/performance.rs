use case_nexus::citation_verifier::extract_citations;
use case_nexus::{
    estimate_tokens, is_approaching_limit, truncate_messages, Case, CaseNumber, CaseStatus,
    ContentBlock, ContextBuilder, InMemoryCorpusStore, InsightLog, Message, MessageRole, Severity,
    TextBlock, ToolResultBlock, ToolUseBlock,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

fn create_messages(count: usize, text_size: usize) -> Vec<Message> {
    let text = "a".repeat(text_size);
    (0..count)
        .map(|i| {
            if i == 0 {
                Message::system(&text)
            } else if i % 2 == 0 {
                Message::user(&text)
            } else {
                Message::assistant(vec![ContentBlock::Text(TextBlock::new(&text))])
            }
        })
        .collect()
}

fn create_messages_with_tools(count: usize) -> Vec<Message> {
    let mut messages = vec![Message::system("You are a helpful assistant")];
    for i in 0..count {
        if i % 3 == 0 {
            messages.push(Message::user("Calculate 2 + 2"));
        } else if i % 3 == 1 {
            let tool_use = ToolUseBlock::new(format!("tool_{i}"), "calculator", json!({"operation": "add", "a": 2, "b": 2}));
            messages.push(Message::new(MessageRole::Assistant, vec![ContentBlock::ToolUse(tool_use)]));
        } else {
            let tool_result = ToolResultBlock::new(format!("tool_{}", i - 1), json!({"result": 4}));
            messages.push(Message::new(MessageRole::User, vec![ContentBlock::ToolResult(tool_result)]));
        }
    }
    messages
}

fn sample_case(cn: &str) -> Case {
    Case {
        case_number: CaseNumber::new(cn).unwrap(),
        defendant: "Doe, J.".to_string(),
        severity: Severity::Felony,
        status: CaseStatus::Open,
        charges: vec!["Assault".to_string(), "Possession".to_string()],
        filing_date: None,
        arrest_date: None,
        hearing_date: None,
        officer: Some("Officer Rodriguez".to_string()),
        judge: None,
        prosecutor: None,
        witnesses: vec!["Jane Smith".to_string()],
        bond: Some("$5,000".to_string()),
        plea_offer: None,
        prior_record: Some("One prior misdemeanor".to_string()),
        notes: Some("Client disputes the arresting officer's account of events.".to_string()),
    }
}

fn bench_estimate_tokens_by_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_by_count");
    for count in [0, 1, 5, 10, 20, 50, 100].iter() {
        let messages = create_messages(*count, 100);
        group.bench_with_input(BenchmarkId::from_parameter(count), &messages, |b, msgs| {
            b.iter(|| estimate_tokens(black_box(msgs)));
        });
    }
    group.finish();
}

fn bench_estimate_tokens_with_tools(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_with_tools");
    for count in [3, 9, 30, 90].iter() {
        let messages = create_messages_with_tools(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &messages, |b, msgs| {
            b.iter(|| estimate_tokens(black_box(msgs)));
        });
    }
    group.finish();
}

fn bench_truncate_messages(c: &mut Criterion) {
    let mut group = c.benchmark_group("truncate_messages");
    let test_cases = vec![
        ("small_keep_5", create_messages(20, 100), 5, true),
        ("medium_keep_10", create_messages(50, 100), 10, true),
        ("large_keep_20", create_messages(100, 100), 20, true),
        ("no_preserve_system", create_messages(50, 100), 10, false),
    ];
    for (name, messages, keep, preserve) in test_cases {
        group.bench_with_input(
            BenchmarkId::new(name, format!("{}/{}", messages.len(), keep)),
            &(messages, keep, preserve),
            |b, (msgs, k, p)| {
                b.iter(|| truncate_messages(black_box(msgs), black_box(*k), black_box(*p)));
            },
        );
    }
    group.finish();
}

fn bench_is_approaching_limit(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_approaching_limit");
    for count in [10, 50, 100].iter() {
        let messages = create_messages(*count, 500);
        group.bench_with_input(BenchmarkId::from_parameter(count), &messages, |b, msgs| {
            b.iter(|| is_approaching_limit(black_box(msgs), black_box(32000), black_box(0.9)));
        });
    }
    group.finish();
}

/// Exercises the hot path a caseload health check walks before every model
/// call: stitching every case's markdown rendering into one prompt.
fn bench_build_full_caseload_context(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("build_full_caseload_context");

    for count in [10, 50, 200, 500].iter() {
        let store = InMemoryCorpusStore::new();
        for i in 0..*count {
            store.seed_case(sample_case(&format!("CR-{i}")));
        }
        let insights = InsightLog::new();
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let builder = ContextBuilder::new(&store, &insights);
                    black_box(builder.build_full_caseload_context().await.unwrap())
                })
            });
        });
    }
    group.finish();
}

/// Citation extraction runs over every motion and brief the model drafts;
/// this tracks the three-regex scan's cost as document length grows.
fn bench_extract_citations(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_citations");
    let citation_dense_line = "See State v. Doe, 410 U.S. 113, and 18-1-304. ";

    for repeats in [1, 10, 50, 200].iter() {
        let text = citation_dense_line.repeat(*repeats);
        group.bench_with_input(BenchmarkId::from_parameter(repeats), &text, |b, text| {
            b.iter(|| extract_citations(black_box(text)));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_estimate_tokens_by_count,
    bench_estimate_tokens_with_tools,
    bench_truncate_messages,
    bench_is_approaching_limit,
    bench_build_full_caseload_context,
    bench_extract_citations,
);
criterion_main!(benches);
