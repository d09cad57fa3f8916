use serde::{Deserialize, Deserializer, Serialize};

/// A user solution to run against a set of tests inside one sandbox.
///
/// `runtime` selects the sandbox image, `solution` is the code under test and
/// `tests` is handed to the sandbox verbatim (it may be empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub runtime: String,
    pub solution: String,
    #[serde(default)]
    pub tests: String,
}

impl JobRequest {
    pub fn new(
        runtime: impl Into<String>,
        solution: impl Into<String>,
        tests: impl Into<String>,
    ) -> Self {
        Self {
            runtime: runtime.into(),
            solution: solution.into(),
            tests: tests.into(),
        }
    }
}

/// Body of a verification request, as sent by clients.
///
/// The runtime is not part of the payload: it comes from the request path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobPayload {
    #[serde(default, alias = "Solution")]
    pub solution: String,
    #[serde(default, alias = "Tests")]
    pub tests: String,
}

impl JobPayload {
    pub fn into_request(self, runtime: impl Into<String>) -> JobRequest {
        JobRequest::new(runtime, self.solution, self.tests)
    }
}

/// Outcome of a job, as reported by the sandbox on its stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub solved: bool,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub printed: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub errors: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<CallResult>,
}

impl JobResult {
    /// Failed result carrying only an error message.
    pub fn failure(errors: impl Into<String>) -> Self {
        Self {
            solved: false,
            errors: errors.into(),
            ..Default::default()
        }
    }
}

/// One assertion evaluated by the sandbox test runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    pub call: String,
    pub expected: String,
    pub received: String,
    pub correct: bool,
}

/// Listing returned when no runtime is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeIndex {
    pub runtimes: Vec<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_from_runner_output() {
        let body = r#"{"solved": true, "results": [{"received": "1", "call": "foo", "expected": "1", "correct": true}], "printed": ""}"#;
        let result: JobResult = serde_json::from_str(body).unwrap();

        assert!(result.solved);
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].call, "foo");
        assert_eq!(result.printed, "");
        assert_eq!(result.errors, "");
    }

    #[test]
    fn test_result_null_fields_default() {
        let result: JobResult =
            serde_json::from_str(r#"{"solved": false, "errors": null, "results": null}"#).unwrap();
        assert!(!result.solved);
        assert!(result.errors.is_empty());
        assert!(result.results.is_empty());
    }

    #[test]
    fn test_result_requires_solved() {
        assert!(serde_json::from_str::<JobResult>(r#"{"printed": "hi"}"#).is_err());
    }

    #[test]
    fn test_result_omits_empty_fields() {
        let json = serde_json::to_value(JobResult::failure("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"solved": false, "errors": "boom"}));
    }

    #[test]
    fn test_payload_accepts_capitalized_keys() {
        let payload: JobPayload =
            serde_json::from_str(r#"{"Solution": "foo = 1", "Tests": ">>> foo\n1"}"#).unwrap();
        let req = payload.into_request("python3");
        assert_eq!(req, JobRequest::new("python3", "foo = 1", ">>> foo\n1"));
    }

    #[test]
    fn test_payload_tests_optional() {
        let payload: JobPayload = serde_json::from_str(r#"{"solution": "x = 2"}"#).unwrap();
        assert_eq!(payload.tests, "");
    }
}
