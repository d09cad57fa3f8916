/// Runtime catalog - defines only which runtimes exist and their images.
/// Ensures the HTTP layer and the sandbox orchestrator never drift on
/// what "supported" means.

pub const PYTHON3_IMAGE: &str = "singpath/verifier-python3";

/// Supported runtime names and the sandbox image each one runs in.
const RUNTIMES: &[(&str, &str)] = &[("python", PYTHON3_IMAGE), ("python3", PYTHON3_IMAGE)];

/// Sandbox image for a runtime, if the runtime is supported
pub fn image_for(runtime: &str) -> Option<&'static str> {
    RUNTIMES
        .iter()
        .find(|(name, _)| *name == runtime)
        .map(|(_, image)| *image)
}

pub fn is_supported(runtime: &str) -> bool {
    image_for(runtime).is_some()
}

/// All supported runtime names, sorted
pub fn supported_runtimes() -> Vec<String> {
    let mut names: Vec<String> = RUNTIMES.iter().map(|(name, _)| name.to_string()).collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_runtimes_share_image() {
        assert_eq!(image_for("python"), Some(PYTHON3_IMAGE));
        assert_eq!(image_for("python3"), Some(PYTHON3_IMAGE));
    }

    #[test]
    fn test_unknown_runtime() {
        assert_eq!(image_for("cobol"), None);
        assert!(!is_supported(""));
        assert!(!is_supported("Python3"));
    }

    #[test]
    fn test_supported_runtimes_sorted() {
        assert_eq!(supported_runtimes(), vec!["python", "python3"]);
    }
}
