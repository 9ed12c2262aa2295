use serde::{Deserialize, Serialize};

/// Running counters for the task in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_actions: u64,
    pub successful_actions: u64,
    pub model_calls: u64,
    pub screenshots: u64,
}

/// Partial counters pushed by the task server in a `stats` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct StatsPatch {
    #[serde(default, alias = "totalActions")]
    pub total_actions: Option<u64>,
    #[serde(default, alias = "successfulActions")]
    pub successful_actions: Option<u64>,
    #[serde(default, alias = "modelCalls")]
    pub model_calls: Option<u64>,
    #[serde(default)]
    pub screenshots: Option<u64>,
}

impl StatsSnapshot {
    pub fn record_action(&mut self, success: bool) {
        self.total_actions = self.total_actions.saturating_add(1);
        if success {
            self.successful_actions = self.successful_actions.saturating_add(1);
        }
    }

    pub fn record_model_call(&mut self) {
        self.model_calls = self.model_calls.saturating_add(1);
    }

    pub fn record_screenshot(&mut self) {
        self.screenshots = self.screenshots.saturating_add(1);
    }

    /// Shallow merge; successful actions never exceed the total afterwards.
    pub fn merge(&mut self, patch: StatsPatch) {
        if let Some(total_actions) = patch.total_actions {
            self.total_actions = total_actions;
        }
        if let Some(successful_actions) = patch.successful_actions {
            self.successful_actions = successful_actions;
        }
        if let Some(model_calls) = patch.model_calls {
            self.model_calls = model_calls;
        }
        if let Some(screenshots) = patch.screenshots {
            self.screenshots = screenshots;
        }
        self.successful_actions = self.successful_actions.min(self.total_actions);
    }

    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_actions == 0 {
            return None;
        }
        Some(self.successful_actions as f64 / self.total_actions as f64)
    }

    /// Success rate as a percentage with one decimal, or `-` before any action.
    #[must_use]
    pub fn success_rate_label(&self) -> String {
        match self.success_rate() {
            Some(rate) => format!("{:.1}%", rate * 100.0),
            None => "-".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn actions_count_successes_separately() {
        let mut stats = StatsSnapshot::default();
        stats.record_action(true);
        stats.record_action(false);
        stats.record_action(true);

        assert_eq!(stats.total_actions, 3);
        assert_eq!(stats.successful_actions, 2);
        assert_eq!(stats.success_rate(), Some(2.0 / 3.0));
        assert_eq!(stats.success_rate_label(), "66.7%");
    }

    #[test]
    fn merge_accepts_both_spellings_and_clamps() {
        let patch: StatsPatch =
            serde_json::from_str(r#"{"totalActions":4,"successful_actions":9,"modelCalls":2}"#)
                .unwrap_or_default();
        let mut stats = StatsSnapshot {
            screenshots: 7,
            ..StatsSnapshot::default()
        };
        stats.merge(patch);

        assert_eq!(
            stats,
            StatsSnapshot {
                total_actions: 4,
                successful_actions: 4,
                model_calls: 2,
                screenshots: 7,
            }
        );
    }

    #[test]
    fn empty_patch_changes_nothing() {
        let mut stats = StatsSnapshot {
            total_actions: 2,
            successful_actions: 1,
            model_calls: 3,
            screenshots: 4,
        };
        let before = stats;
        stats.merge(StatsPatch::default());
        assert_eq!(stats, before);
        assert_eq!(StatsSnapshot::default().success_rate(), None);
        assert_eq!(StatsSnapshot::default().success_rate_label(), "-");
    }

    fn successes_never_exceed_total(outcomes: Vec<bool>) -> bool {
        let mut stats = StatsSnapshot::default();
        outcomes.into_iter().all(|success| {
            stats.record_action(success);
            stats.successful_actions <= stats.total_actions
        })
    }

    fn merge_keeps_invariant(total: Option<u64>, successful: Option<u64>, prior: Vec<bool>) -> bool {
        let mut stats = StatsSnapshot::default();
        for success in prior {
            stats.record_action(success);
        }
        stats.merge(StatsPatch {
            total_actions: total,
            successful_actions: successful,
            ..StatsPatch::default()
        });
        stats.successful_actions <= stats.total_actions
    }

    #[test]
    fn stats_invariant_holds_for_arbitrary_sequences() {
        quickcheck(successes_never_exceed_total as fn(Vec<bool>) -> bool);
        quickcheck(merge_keeps_invariant as fn(Option<u64>, Option<u64>, Vec<bool>) -> bool);
    }
}
