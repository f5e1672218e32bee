use serde::{Deserialize, Serialize};

/// Daily quota status for the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    #[serde(rename = "userID")]
    pub user_id: Option<i64>,
    pub messages_today: u32,
    pub daily_limit: u32,
    pub messages_remaining: u32,
}

impl UserStats {
    /// Build stats from the two server counters. The remaining allowance is
    /// always derived here, never decremented locally.
    pub fn new(user_id: Option<i64>, messages_today: u32, daily_limit: u32) -> Self {
        Self {
            user_id,
            messages_today,
            daily_limit,
            messages_remaining: daily_limit.saturating_sub(messages_today),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.messages_remaining == 0
    }
}

/// Wire shape of `GET /stats`
#[derive(Debug, Deserialize)]
pub struct StatsWire {
    pub daily_messages: i64,
    pub daily_limit: i64,
    #[serde(default)]
    pub remaining: Option<i64>,
}

impl StatsWire {
    pub fn into_stats(self, user_id: Option<i64>) -> UserStats {
        let today = clamp_count(self.daily_messages);
        let limit = clamp_count(self.daily_limit);
        let stats = UserStats::new(user_id, today, limit);

        if let Some(remaining) = self.remaining {
            if remaining != i64::from(stats.messages_remaining) {
                tracing::debug!(
                    server_remaining = remaining,
                    derived_remaining = stats.messages_remaining,
                    "Server remaining differs from derived value"
                );
            }
        }

        stats
    }
}

fn clamp_count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
