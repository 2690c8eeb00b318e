//! Resource-allocation request and its command-line rendering.

use serde::{Deserialize, Serialize};

/// Parameters of an interactive allocation (`salloc`) request.
///
/// Every field is optional. Empty strings and zero counts are treated the
/// same as absent fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_count: Option<u32>,
}

impl AllocRequest {
    /// Build the scheduler argument list for this request.
    ///
    /// Always requests one task per node; each optional parameter adds its
    /// flag only when it carries a non-empty / non-zero value.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["--ntasks-per-node".to_string(), "1".to_string()];

        if let Some(name) = non_empty(&self.task_name) {
            args.push("--job-name".into());
            args.push(name.to_string());
        }
        if let Some(partition) = non_empty(&self.partition) {
            args.push("--partition".into());
            args.push(partition.to_string());
        }
        if let Some(gpus) = non_zero(self.gpu_count) {
            args.push("--gpus".into());
            args.push(gpus.to_string());
        }
        if let Some(cpus) = non_zero(self.cpu_count) {
            args.push("--cpus-per-task".into());
            args.push(cpus.to_string());
        }

        args
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn non_zero(value: Option<u32>) -> Option<u32> {
    value.filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_request_only_sets_ntasks() {
        let args = AllocRequest::default().to_args();
        assert_eq!(args, vec!["--ntasks-per-node", "1"]);
    }

    #[test]
    fn zero_gpus_omits_flag() {
        let req = AllocRequest {
            gpu_count: Some(0),
            ..Default::default()
        };
        let args = req.to_args();
        assert!(!args.iter().any(|a| a == "--gpus"));
    }

    #[test]
    fn two_gpus_sets_flag() {
        let req = AllocRequest {
            gpu_count: Some(2),
            ..Default::default()
        };
        let args = req.to_args();
        let pos = args.iter().position(|a| a == "--gpus").unwrap();
        assert_eq!(args[pos + 1], "2");
    }

    #[test]
    fn all_fields() {
        let req = AllocRequest {
            task_name: Some("debug".into()),
            partition: Some("gpu".into()),
            gpu_count: Some(4),
            cpu_count: Some(16),
        };
        assert_eq!(
            req.to_args(),
            vec![
                "--ntasks-per-node",
                "1",
                "--job-name",
                "debug",
                "--partition",
                "gpu",
                "--gpus",
                "4",
                "--cpus-per-task",
                "16",
            ]
        );
    }

    #[test]
    fn blank_strings_are_absent() {
        let req = AllocRequest {
            task_name: Some("   ".into()),
            partition: Some(String::new()),
            cpu_count: Some(0),
            ..Default::default()
        };
        assert_eq!(req.to_args(), vec!["--ntasks-per-node", "1"]);
    }

    #[test]
    fn deserialize_partial_json() {
        let req: AllocRequest = serde_json::from_str(r#"{"gpu_count": 2}"#).unwrap();
        assert_eq!(req.gpu_count, Some(2));
        assert!(req.task_name.is_none());

        let req: AllocRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, AllocRequest::default());
    }
}
