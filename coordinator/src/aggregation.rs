//! Aggregation of requests into unique API calls and disaggregation of the
//! outcomes back onto every originating request.
//!
//! Two requests aggregate only when both the endpoint and the full parameter
//! set (reserved parameters included) are identical, since reserved
//! parameters change the encoded result. Signatures bind the request id and
//! are therefore computed per request at disaggregation, never per call.

use crate::api::ResponseSigner;
use crate::model::{AggregatedApiCall, CallOutcome, Request, RequestStatus, SignedResponse};
use alloy_primitives::B256;
use serde_json::Value;
use std::collections::HashMap;

/// Merges pending API-call requests into one call per distinct
/// (endpoint, parameters) tuple, preserving first-seen order.
pub fn aggregate_api_calls(requests: &[Request]) -> Vec<AggregatedApiCall> {
    let mut calls: Vec<AggregatedApiCall> = Vec::new();
    let mut index_by_key: HashMap<(B256, String), usize> = HashMap::new();

    for request in requests {
        if request.status != RequestStatus::Pending || !request.is_api_call() {
            continue;
        }
        let Some(endpoint_id) = request.endpoint_id else { continue };
        let key = (endpoint_id, canonical_parameters(request));

        match index_by_key.get(&key) {
            Some(&index) => calls[index].request_ids.push(request.id),
            None => {
                index_by_key.insert(key, calls.len());
                calls.push(AggregatedApiCall {
                    airnode: request.airnode,
                    endpoint_id,
                    parameters: request.parameters.clone(),
                    request_ids: vec![request.id],
                    outcome: None,
                });
            }
        }
    }
    calls
}

// serde_json maps are ordered by key, so serialization is canonical.
fn canonical_parameters(request: &Request) -> String {
    serde_json::to_string(&Value::Object(request.parameters.clone())).unwrap_or_default()
}

/// Maps each executed call's outcome back onto its originating requests.
/// Successes get a per-request signature over the encoded value; failures
/// mark the request Errored with the call's message. Requests no call covers
/// pass through untouched.
pub async fn apply_call_outcomes(
    requests: Vec<Request>,
    calls: &[AggregatedApiCall],
    signer: &dyn ResponseSigner,
) -> Vec<Request> {
    let mut outcome_by_request: HashMap<B256, &CallOutcome> = HashMap::new();
    for call in calls {
        let Some(outcome) = &call.outcome else { continue };
        for request_id in &call.request_ids {
            outcome_by_request.insert(*request_id, outcome);
        }
    }

    let mut applied = Vec::with_capacity(requests.len());
    for mut request in requests {
        if request.status != RequestStatus::Pending || !request.is_api_call() {
            applied.push(request);
            continue;
        }
        let Some(outcome) = outcome_by_request.get(&request.id) else {
            applied.push(request);
            continue;
        };
        match outcome {
            CallOutcome::Success { encoded_value, .. } => {
                match signer.sign_response(request.id, encoded_value).await {
                    Ok(signature) => {
                        request.response =
                            Some(SignedResponse { encoded_value: encoded_value.clone(), signature });
                        applied.push(request);
                    }
                    Err(error) => {
                        tracing::warn!(request_id = %request.id, %error, "response signing failed");
                        applied.push(request.errored("API call failed"));
                    }
                }
            }
            CallOutcome::Error { message } => {
                applied.push(request.errored(message.clone()));
            }
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCallError, MockResponseSigner};
    use crate::model::test_helpers::make_request;
    use alloy_primitives::Bytes;
    use serde_json::json;

    fn request_with_parameters(id_byte: u8, entries: &[(&str, Value)]) -> Request {
        let mut request = make_request(id_byte);
        request.parameters = entries.iter().map(|(key, value)| (key.to_string(), value.clone())).collect();
        request
    }

    #[test]
    fn identical_calls_are_merged_in_scan_order() {
        let requests = vec![
            request_with_parameters(0x01, &[("from", json!("ETH"))]),
            request_with_parameters(0x02, &[("from", json!("BTC"))]),
            request_with_parameters(0x03, &[("from", json!("ETH"))]),
        ];

        let calls = aggregate_api_calls(&requests);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].request_ids, vec![B256::repeat_byte(0x01), B256::repeat_byte(0x03)]);
        assert_eq!(calls[1].request_ids, vec![B256::repeat_byte(0x02)]);
    }

    #[test]
    fn differing_reserved_parameters_prevent_merging() {
        let requests = vec![
            request_with_parameters(0x01, &[("from", json!("ETH")), ("_times", json!("100"))]),
            request_with_parameters(0x02, &[("from", json!("ETH")), ("_times", json!("1000"))]),
        ];
        assert_eq!(aggregate_api_calls(&requests).len(), 2);
    }

    #[test]
    fn non_pending_and_withdrawal_requests_are_not_aggregated() {
        use crate::model::RequestKind;

        let errored = make_request(0x01).errored("broken");
        let mut withdrawal = make_request(0x02);
        withdrawal.kind = RequestKind::Withdrawal;

        assert!(aggregate_api_calls(&[errored, withdrawal]).is_empty());
    }

    #[tokio::test]
    async fn successes_are_signed_per_request() {
        let requests = vec![make_request(0x01), make_request(0x02)];
        let mut calls = aggregate_api_calls(&requests);
        assert_eq!(calls.len(), 1);
        calls[0].outcome =
            Some(CallOutcome::Success { encoded_value: Bytes::from(vec![0x07]), raw: json!(7) });

        let mut signer = MockResponseSigner::new();
        signer
            .expect_sign_response()
            .times(2)
            .returning(|request_id, _| Ok(Bytes::from(request_id.to_vec())));

        let applied = apply_call_outcomes(requests, &calls, &signer).await;
        for request in &applied {
            let response = request.response.as_ref().unwrap();
            assert_eq!(response.encoded_value, Bytes::from(vec![0x07]));
            // The signature binds this request, not the shared call.
            assert_eq!(response.signature, Bytes::from(request.id.to_vec()));
        }
    }

    #[tokio::test]
    async fn call_errors_mark_every_originating_request() {
        let requests = vec![make_request(0x01), make_request(0x02)];
        let mut calls = aggregate_api_calls(&requests);
        calls[0].outcome = Some(CallOutcome::Error { message: "API call failed".into() });

        let signer = MockResponseSigner::new();
        let applied = apply_call_outcomes(requests, &calls, &signer).await;
        for request in &applied {
            assert_eq!(request.status, RequestStatus::Errored);
            assert_eq!(request.error_message.as_deref(), Some("API call failed"));
        }
    }

    #[tokio::test]
    async fn signing_failure_degrades_to_a_generic_call_failure() {
        let requests = vec![make_request(0x01)];
        let mut calls = aggregate_api_calls(&requests);
        calls[0].outcome =
            Some(CallOutcome::Success { encoded_value: Bytes::from(vec![0x07]), raw: json!(7) });

        let mut signer = MockResponseSigner::new();
        signer.expect_sign_response().returning(|_, _| Err(ApiCallError::Signing("no key".into())));

        let applied = apply_call_outcomes(requests, &calls, &signer).await;
        assert_eq!(applied[0].status, RequestStatus::Errored);
        assert_eq!(applied[0].error_message.as_deref(), Some("API call failed"));
    }

    #[tokio::test]
    async fn uncovered_requests_pass_through_untouched() {
        let requests = vec![make_request(0x01)];
        let signer = MockResponseSigner::new();
        let applied = apply_call_outcomes(requests.clone(), &[], &signer).await;
        assert_eq!(applied[0].status, RequestStatus::Pending);
        assert!(applied[0].response.is_none());
    }
}
