//! Order journal. Every reconciliation attempt, successful or not, leaves an
//! entry so that failed or disputed payments can be investigated later.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::domain::{AuditEntry, AuditSink, Error};

/// Writes one JSON document per entry into a directory.
#[derive(Debug)]
pub struct FileAuditSink {
    dir: PathBuf,
}

impl FileAuditSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(entry: &AuditEntry) -> String {
        let order: String = entry
            .order_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .take(64)
            .collect();
        format!(
            "order_{}_{}_{}.log",
            entry.at.format("%Y%m%d_%H%M%S%.6f"),
            order,
            entry.outcome
        )
    }

    fn write(&self, entry: &AuditEntry) -> Result<(), Error> {
        let body = serde_json::to_vec_pretty(entry)
            .map_err(|e| Error::Internal(format!("audit entry not serializable: {}", e)))?;
        fs::write(self.dir.join(Self::file_name(entry)), body)?;
        Ok(())
    }
}

impl AuditSink for FileAuditSink {
    fn report(&self, entry: &AuditEntry) {
        if let Err(e) = self.write(entry) {
            warn!(order_id = %entry.order_id, error = %e, "could not write order log");
        }
    }
}

/// Journal that only emits tracing events.
#[derive(Default, Debug)]
pub struct TracingAuditSink {}

impl AuditSink for TracingAuditSink {
    fn report(&self, entry: &AuditEntry) {
        info!(
            order_id = %entry.order_id,
            account_id = ?entry.account_id,
            state = ?entry.state,
            outcome = %entry.outcome,
            coins = ?entry.coins,
            "order journal"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditSource, OrderState};

    #[test]
    fn writes_one_file_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileAuditSink::new(dir.path().join("order_logs")).unwrap();

        sink.report(&AuditEntry::success(
            AuditSource::Checkout,
            "5O190127TN364715T",
            7,
            "credited",
            1100,
        ));
        sink.report(&AuditEntry::failure(
            AuditSource::Ipn,
            "../../etc/passwd",
            None,
            OrderState::Unresolvable,
            &Error::InvalidTier("3.33".into()),
        ));

        let mut names: Vec<String> = fs::read_dir(sink.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n.starts_with("order_") && !n.contains('/')));
        assert!(names.iter().any(|n| n.ends_with("_credited.log")));

        let credited = names.iter().find(|n| n.ends_with("_credited.log")).unwrap();
        let body: serde_json::Value =
            serde_json::from_slice(&fs::read(sink.dir().join(credited)).unwrap()).unwrap();
        assert_eq!(body["coins"], 1100);
        assert_eq!(body["state"], "credited");
    }
}
