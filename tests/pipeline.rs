//! Orchestrator integration tests with a scripted Recognition Client.
//!
//! No network: every model answer is queued up front, and every request the
//! orchestrator sends is recorded so the tests can check what was asked.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_propscan::pipeline::parse::parse_record;
use edgequake_propscan::{
    extract_stream, CriticalField, ExtractError, ExtractionConfig, ExtractionProgressCallback,
    ExtractionResponse, Extractor, ImageSource, Pass, RecognitionClient, RecognitionError,
    RecognitionRequest, RecognitionResponse, TokenUsage,
};
use futures::StreamExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::json;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

// ── Test doubles ─────────────────────────────────────────────────────────────

type Scripted = Result<RecognitionResponse, RecognitionError>;

/// Answers requests from a queue, in order, and records each request.
#[derive(Default)]
struct ScriptedClient {
    replies: Mutex<VecDeque<Scripted>>,
    seen: Mutex<Vec<RecognitionRequest>>,
}

impl ScriptedClient {
    fn new(replies: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<RecognitionRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecognitionClient for ScriptedClient {
    async fn recognize(&self, request: &RecognitionRequest) -> Result<RecognitionResponse, RecognitionError> {
        self.seen.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(RecognitionError::Provider {
                    attempts: 1,
                    detail: "script exhausted".into(),
                })
            })
    }
}

/// Always gives the same answer; safe under concurrency.
struct FixedClient(String);

#[async_trait]
impl RecognitionClient for FixedClient {
    async fn recognize(&self, _request: &RecognitionRequest) -> Result<RecognitionResponse, RecognitionError> {
        reply(&self.0, 10, 5)
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl ExtractionProgressCallback for Recorder {
    fn on_extraction_start(&self, image_count: usize) {
        self.0.lock().unwrap().push(format!("start {image_count}"));
    }
    fn on_pass_start(&self, pass: Pass) {
        self.0.lock().unwrap().push(format!("{pass} start"));
    }
    fn on_pass_complete(&self, pass: Pass, usage: TokenUsage) {
        self.0
            .lock()
            .unwrap()
            .push(format!("{pass} done {}", usage.input_tokens));
    }
    fn on_pass_error(&self, pass: Pass, _error: &str) {
        self.0.lock().unwrap().push(format!("{pass} error"));
    }
    fn on_missing_fields(&self, fields: &[CriticalField]) {
        self.0.lock().unwrap().push(format!("missing {}", fields.len()));
    }
    fn on_extraction_complete(&self, success: bool) {
        self.0.lock().unwrap().push(format!("complete {success}"));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn reply(text: &str, input: u64, output: u64) -> Scripted {
    Ok(RecognitionResponse {
        text: text.to_string(),
        usage: TokenUsage {
            input_tokens: input,
            output_tokens: output,
        },
    })
}

fn photo() -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([230, 230, 230])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode");
    buf
}

fn config() -> ExtractionConfig {
    ExtractionConfig::builder()
        .preprocess(false)
        .build()
        .expect("valid config")
}

/// A complete pass-1 answer with `furniture_status` set to `furniture`.
fn pass1_json(furniture: &str) -> String {
    json!({
        "all_visible_text": "Bán nhà mặt tiền Quận 3 ...",
        "property_info": {
            "address": "45 Võ Văn Tần, Quận 3",
            "property_type": "Nhà phố",
            "usable_area_m2": 95.25,
            "bedrooms": 3,
            "bathrooms": 2,
            "floors": 4,
            "direction": "Tây - Bắc",
            "legal_status": "Sổ hồng",
            "furniture_status": furniture,
            "width_m": 5,
            "length_m": 19.05
        },
        "condition_assessment": {
            "overall_condition": "Tốt",
            "major_issues": []
        }
    })
    .to_string()
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn complete_first_pass_makes_one_call() {
    let text = format!("```json\n{}\n```", pass1_json("Đầy đủ"));
    let client = ScriptedClient::new(vec![reply(&text, 1000, 200)]);
    let extractor = Extractor::new(client.clone(), config());

    let outcome = extractor.extract(vec![photo()]).await.unwrap();

    assert_eq!(client.requests().len(), 1);
    assert_eq!(outcome.passes, 1);
    assert!(outcome.retry_info.is_none());
    assert!(outcome.warning.is_none());
    assert_eq!(outcome.record.property_info.usable_area_m2, Some(95.25));
    assert_eq!(
        outcome.usage,
        TokenUsage {
            input_tokens: 1000,
            output_tokens: 200
        }
    );
    assert!(outcome.unresolved_fields().is_empty());
}

#[tokio::test]
async fn empty_furniture_status_is_recovered() {
    let client = ScriptedClient::new(vec![
        reply(&pass1_json(""), 1000, 200),
        reply("{\"furniture_status\": \"Cơ bản\"}", 300, 20),
    ]);
    let extractor = Extractor::new(client.clone(), config());

    let outcome = extractor.extract(vec![photo()]).await.unwrap();

    let info = outcome.retry_info.expect("recovery attempted");
    assert_eq!(info.attempted_fields, vec![CriticalField::FurnitureStatus]);
    assert_eq!(info.recovered_fields, vec![CriticalField::FurnitureStatus]);
    assert_eq!(info.recovery_rate, "1/1");
    assert_eq!(
        outcome.record.property_info.furniture_status.as_deref(),
        Some("Cơ bản")
    );
    assert_eq!(outcome.passes, 2);
    assert_eq!(
        outcome.usage,
        TokenUsage {
            input_tokens: 1300,
            output_tokens: 220
        }
    );
}

#[tokio::test]
async fn recovery_request_names_only_missing_fields() {
    let client = ScriptedClient::new(vec![
        reply(&pass1_json(""), 1000, 200),
        reply("{}", 300, 20),
    ]);
    let extractor = Extractor::new(client.clone(), config());
    extractor.extract(vec![photo(), photo()]).await.unwrap();

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    let (first, second) = (&requests[0], &requests[1]);

    assert_eq!(first.max_output_tokens, 3000);
    assert_eq!(second.max_output_tokens, 1000);
    assert_eq!(second.images, first.images, "pass 2 re-sends the same images");
    assert!(second.user_prompt.contains("furniture_status"));
    assert!(!second.user_prompt.contains("\"bedrooms\""));
    assert!(!second.user_prompt.contains("\"legal_status\""));
}

#[tokio::test]
async fn first_pass_failure_is_fatal() {
    let client = ScriptedClient::new(vec![Err(RecognitionError::Timeout { secs: 120 })]);
    let extractor = Extractor::new(client.clone(), config());

    let err = extractor.extract(vec![photo()]).await.unwrap_err();

    assert!(matches!(
        err,
        ExtractError::RecognitionUnavailable(RecognitionError::Timeout { secs: 120 })
    ));
    assert_eq!(client.requests().len(), 1, "no pass 2 after a failed pass 1");

    let resp = serde_json::to_value(ExtractionResponse::from_result(&Err(err))).unwrap();
    assert_eq!(resp["success"], json!(false));
    assert!(resp["error"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn unparsable_first_pass_is_malformed_response() {
    let client = ScriptedClient::new(vec![reply("I cannot read this listing.", 900, 10)]);
    let extractor = Extractor::new(client.clone(), config());

    let err = extractor.extract(vec![photo()]).await.unwrap_err();
    match err {
        ExtractError::MalformedResponse(e) => assert_eq!(e.snippet, "I cannot read this listing."),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn second_pass_failure_keeps_first_pass_record() {
    let pass1 = json!({
        "property_info": {
            "usable_area_m2": 91,
            "bedrooms": 4,
            "bathrooms": 3,
            "floors": 3,
            "direction": "Đông",
            "legal_status": "Sổ đỏ",
            "furniture_status": "Cơ bản",
            "width_m": 4.5,
            "length_m": null
        }
    })
    .to_string();
    let client = ScriptedClient::new(vec![
        reply(&pass1, 1000, 200),
        Err(RecognitionError::Provider {
            attempts: 3,
            detail: "HTTP 503".into(),
        }),
    ]);
    let extractor = Extractor::new(client.clone(), config());

    let outcome = extractor.extract(vec![photo()]).await.unwrap();

    let warning = outcome.warning.as_deref().expect("warning set");
    assert!(warning.starts_with("Partial recovery failed"), "got: {warning}");
    let first_pass = parse_record(&pass1).unwrap();
    assert_eq!(outcome.record, first_pass, "failed recovery must not touch the record");
    assert_eq!(outcome.record.property_info.length_m, None);

    let info = outcome.retry_info.as_ref().unwrap();
    assert_eq!(info.attempted_fields, vec![CriticalField::LengthM]);
    assert!(info.recovered_fields.is_empty());
    assert_eq!(info.recovery_rate, "0/1");
    assert_eq!(outcome.usage.input_tokens, 1000);

    let resp = serde_json::to_value(ExtractionResponse::from_result(&Ok(outcome))).unwrap();
    assert_eq!(resp["success"], json!(true));
    assert!(resp["warning"].is_string());
}

#[tokio::test]
async fn malformed_second_pass_still_counts_tokens() {
    let client = ScriptedClient::new(vec![
        reply(&pass1_json(""), 1000, 200),
        reply("furniture: basic", 300, 20),
    ]);
    let extractor = Extractor::new(client.clone(), config());

    let outcome = extractor.extract(vec![photo()]).await.unwrap();

    assert!(outcome.warning.is_some());
    assert_eq!(outcome.record.property_info.furniture_status.as_deref(), Some(""));
    assert_eq!(
        outcome.usage,
        TokenUsage {
            input_tokens: 1300,
            output_tokens: 220
        }
    );
}

#[tokio::test]
async fn merge_ignores_keys_that_were_not_requested() {
    let client = ScriptedClient::new(vec![
        reply(&pass1_json(""), 1000, 200),
        reply(
            "{\"furniture_status\": \"Đầy đủ\", \"bedrooms\": 9, \"address\": \"khác\", \"price\": 1}",
            300,
            20,
        ),
    ]);
    let extractor = Extractor::new(client.clone(), config());

    let outcome = extractor.extract(vec![photo()]).await.unwrap();
    let info = &outcome.record.property_info;

    assert_eq!(info.furniture_status.as_deref(), Some("Đầy đủ"));
    assert_eq!(info.bedrooms, Some(3));
    assert_eq!(info.address.as_deref(), Some("45 Võ Văn Tần, Quận 3"));
    assert_eq!(
        outcome.retry_info.unwrap().recovered_fields,
        vec![CriticalField::FurnitureStatus]
    );
}

#[tokio::test]
async fn null_recovery_values_do_not_delete() {
    let client = ScriptedClient::new(vec![
        reply(&pass1_json(""), 1000, 200),
        reply("{\"furniture_status\": null}", 300, 20),
    ]);
    let extractor = Extractor::new(client.clone(), config());

    let outcome = extractor.extract(vec![photo()]).await.unwrap();

    assert_eq!(outcome.record.property_info.furniture_status.as_deref(), Some(""));
    assert_eq!(outcome.retry_info.unwrap().recovery_rate, "0/1");
    assert!(outcome.warning.is_none());
}

#[tokio::test]
async fn zero_values_trigger_recovery() {
    let pass1 = json!({
        "property_info": {
            "usable_area_m2": 0, "bedrooms": 0, "bathrooms": 2, "floors": 1,
            "direction": "Nam", "legal_status": "Sổ hồng", "furniture_status": "Cơ bản",
            "width_m": 4, "length_m": 15
        }
    })
    .to_string();
    let client = ScriptedClient::new(vec![
        reply(&pass1, 100, 10),
        reply("{\"usable_area_m2\": \"60,5\", \"bedrooms\": \"2\"}", 50, 5),
    ]);
    let extractor = Extractor::new(client.clone(), config());

    let outcome = extractor.extract(vec![photo()]).await.unwrap();

    let info = outcome.retry_info.unwrap();
    assert_eq!(
        info.attempted_fields,
        vec![CriticalField::UsableAreaM2, CriticalField::Bedrooms]
    );
    assert_eq!(info.recovery_rate, "2/2");
    assert_eq!(outcome.record.property_info.usable_area_m2, Some(60.5));
    assert_eq!(outcome.record.property_info.bedrooms, Some(2));
}

#[tokio::test]
async fn recovery_disabled_skips_second_pass() {
    let client = ScriptedClient::new(vec![reply(&pass1_json(""), 1000, 200)]);
    let config = ExtractionConfig::builder()
        .preprocess(false)
        .recovery(false)
        .build()
        .unwrap();
    let extractor = Extractor::new(client.clone(), config);

    let outcome = extractor.extract(vec![photo()]).await.unwrap();

    assert_eq!(client.requests().len(), 1);
    assert!(outcome.retry_info.is_none());
    assert_eq!(outcome.unresolved_fields(), vec![CriticalField::FurnitureStatus]);
}

#[tokio::test]
async fn no_images_is_rejected_before_any_call() {
    let client = ScriptedClient::new(vec![]);
    let extractor = Extractor::new(client.clone(), config());

    let err = extractor.extract(Vec::new()).await.unwrap_err();

    assert!(matches!(err, ExtractError::NoImages));
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn preprocessing_sends_jpeg() {
    let client = ScriptedClient::new(vec![reply(&pass1_json("Đầy đủ"), 1, 1)]);
    let config = ExtractionConfig::builder()
        .min_short_side(12)
        .max_upscaled_side(64)
        .build()
        .unwrap();
    let extractor = Extractor::new(client.clone(), config);

    extractor.extract(vec![photo()]).await.unwrap();

    let sent = &client.requests()[0].images[0];
    assert_eq!(sent.format(), edgequake_propscan::AssetFormat::Jpeg);
}

#[tokio::test]
async fn progress_events_follow_the_protocol() {
    let recorder = Arc::new(Recorder::default());
    let client = ScriptedClient::new(vec![
        reply(&pass1_json(""), 1000, 200),
        reply("{\"furniture_status\": \"Cơ bản\"}", 300, 20),
    ]);
    let config = ExtractionConfig::builder()
        .preprocess(false)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    Extractor::new(client, config)
        .extract(vec![photo()])
        .await
        .unwrap();

    assert_eq!(
        *recorder.0.lock().unwrap(),
        vec![
            "start 1",
            "Pass 1 start",
            "Pass 1 done 1000",
            "missing 1",
            "Pass 2 start",
            "Pass 2 done 300",
            "complete true",
        ]
    );
}

#[tokio::test]
async fn stream_yields_every_listing_with_its_index() {
    let data_uri = format!("data:image/png;base64,{}", STANDARD.encode(photo()));
    let listings = vec![
        vec![ImageSource::parse(&data_uri)],
        vec![ImageSource::parse("/definitely/missing.jpg")],
        vec![ImageSource::parse(&data_uri), ImageSource::parse(&data_uri)],
    ];
    let extractor = Extractor::new(
        Arc::new(FixedClient(pass1_json("Cơ bản"))),
        ExtractionConfig::builder()
            .preprocess(false)
            .concurrency(2)
            .build()
            .unwrap(),
    );

    let mut results: Vec<_> = extract_stream(listings, extractor).collect().await;
    results.sort_by_key(|(idx, _)| *idx);

    assert_eq!(results.len(), 3);
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(ExtractError::ImageNotFound { .. })));
    assert!(results[2].1.is_ok());
}
