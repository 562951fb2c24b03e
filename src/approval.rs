// Approval manager: in-memory pending-approval store with strategy dedup.

use crate::core::errors::ApprovalError;
use crate::core::models::{now, ApprovalStatus, ApprovalStrategy, PendingApproval, RULE_REMOVED_RULE_ID};
use dashmap::DashMap;
use std::sync::Mutex;

pub struct ApprovalStore {
    approvals: DashMap<String, Mutex<PendingApproval>>,
    max_age_secs: u64,
}

impl ApprovalStore {
    pub fn new(max_age_secs: u64) -> Self {
        Self {
            approvals: DashMap::new(),
            max_age_secs,
        }
    }

    /// Creates a new pending approval, or returns the id of an existing one
    /// that the strategy says already covers this call.
    pub fn create(
        &self,
        rule_id: &str,
        tool_name: &str,
        args: serde_json::Value,
        session_id: &str,
        strategy: ApprovalStrategy,
    ) -> String {
        if let Some(existing) = self.find_covering(rule_id, tool_name, session_id, strategy) {
            return existing;
        }
        let approval_id = uuid::Uuid::new_v4().to_string();
        let record = PendingApproval {
            approval_id: approval_id.clone(),
            tool_name: tool_name.to_string(),
            args,
            session_id: session_id.to_string(),
            rule_id: rule_id.to_string(),
            created_at: now(),
            status: ApprovalStatus::Pending,
            responder: None,
        };
        self.approvals.insert(approval_id.clone(), Mutex::new(record));
        approval_id
    }

    fn find_covering(
        &self,
        rule_id: &str,
        tool_name: &str,
        session_id: &str,
        strategy: ApprovalStrategy,
    ) -> Option<String> {
        self.approvals.iter().find_map(|entry| {
            let record = entry.value().lock().unwrap();
            let same_scope = match strategy {
                ApprovalStrategy::Once => true,
                ApprovalStrategy::PerSession => record.session_id == session_id,
                ApprovalStrategy::PerRule => record.rule_id == rule_id && record.session_id == session_id,
                ApprovalStrategy::PerTool => record.tool_name == tool_name && record.session_id == session_id,
            };
            if same_scope && record.rule_id == rule_id {
                Some(record.approval_id.clone())
            } else {
                None
            }
        })
    }

    /// Resolves a pending approval. Idempotent only up to the first
    /// resolution; a second call on an already-resolved record is rejected.
    pub fn respond(
        &self,
        approval_id: &str,
        approved: bool,
        responder: Option<String>,
    ) -> Result<(), ApprovalError> {
        let entry = self.approvals.get(approval_id).ok_or(ApprovalError::NotFound)?;
        let mut record = entry.lock().unwrap();
        if record.status != ApprovalStatus::Pending {
            return Err(ApprovalError::AlreadyResolved);
        }
        record.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Denied
        };
        record.responder = responder;
        Ok(())
    }

    pub fn poll(&self, approval_id: &str) -> Result<PendingApproval, ApprovalError> {
        let entry = self.approvals.get(approval_id).ok_or(ApprovalError::NotFound)?;
        Ok(entry.lock().unwrap().clone())
    }

    /// Polls an approval, collapsing it to `Denied` first if a hot-reload
    /// has dropped the rule it was created under. `rule_exists` is given the
    /// record's `rule_id` and should check it against the live ruleset.
    pub fn poll_checking_rule(
        &self,
        approval_id: &str,
        rule_exists: impl FnOnce(&str) -> bool,
    ) -> Result<PendingApproval, ApprovalError> {
        let entry = self.approvals.get(approval_id).ok_or(ApprovalError::NotFound)?;
        let mut record = entry.lock().unwrap();
        if record.status == ApprovalStatus::Pending && !rule_exists(&record.rule_id) {
            record.status = ApprovalStatus::Denied;
            record.responder = Some(RULE_REMOVED_RULE_ID.to_string());
        }
        Ok(record.clone())
    }

    pub fn list_pending(&self) -> Vec<PendingApproval> {
        self.approvals
            .iter()
            .filter_map(|entry| {
                let record = entry.lock().unwrap();
                (record.status == ApprovalStatus::Pending).then(|| record.clone())
            })
            .collect()
    }

    /// Garbage-collects records older than the configured max age.
    pub fn evict_expired(&self) {
        let cutoff = now() - self.max_age_secs as f64;
        self.approvals.retain(|_, record| record.lock().unwrap().created_at >= cutoff);
    }
}
