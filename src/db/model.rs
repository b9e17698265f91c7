//! Database view models returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};

use crate::model::{AuditStatus, Priority};

/// Result of inserting a lead keyed on its website URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(i64),
    Duplicate,
}

/// Scores captured next to a generated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutreachScores {
    pub qualification: u8,
    pub composite: u8,
    pub priority: Priority,
}

/// Outreach row joined with the recipient, used by the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub outreach_id: i64,
    pub lead_id: i64,
    pub business_name: String,
    pub email: String,
    pub subject: String,
    pub body: String,
    pub qualification_score: u8,
}

/// One lead with the state of its latest audit and its outreach, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadOverview {
    pub id: i64,
    pub business_name: String,
    pub website_url: String,
    pub email: Option<String>,
    pub audit_status: Option<AuditStatus>,
    pub audited_at: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub qualification_score: Option<u8>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Funnel counters across the whole store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionStats {
    pub leads: i64,
    pub audited: i64,
    pub generated: i64,
    pub sent: i64,
    pub opened: i64,
    pub replied: i64,
    pub positive: i64,
    pub meetings: i64,
    pub closed: i64,
    pub revenue: f64,
}

impl ConversionStats {
    fn rate(part: i64, whole: i64) -> f64 {
        if whole == 0 {
            0.0
        } else {
            part as f64 * 100.0 / whole as f64
        }
    }

    pub fn open_rate(&self) -> f64 {
        Self::rate(self.opened, self.sent)
    }

    pub fn reply_rate(&self) -> f64 {
        Self::rate(self.replied, self.sent)
    }

    pub fn meeting_rate(&self) -> f64 {
        Self::rate(self.meetings, self.sent)
    }

    pub fn close_rate(&self) -> f64 {
        Self::rate(self.closed, self.sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_are_zero_without_sends() {
        let stats = ConversionStats {
            opened: 3,
            ..Default::default()
        };
        assert_eq!(stats.open_rate(), 0.0);

        let stats = ConversionStats {
            sent: 4,
            replied: 1,
            ..Default::default()
        };
        assert_eq!(stats.reply_rate(), 25.0);
    }
}
