// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A manual score correction recorded by an admin. Kept alongside the derived
/// score so the projection stays fully recomputable from the transaction log
/// plus this list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAdjustment {
    pub delta: i64,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A team's derived score. Has no stored identity outside the session; the
/// engine rebuilds it from `transactions + admin_adjustments + token catalog`
/// whenever the log changes out from under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamScore {
    pub team_id: String,
    pub base_score: i64,
    pub bonus_points: i64,
    pub current_score: i64,
    pub tokens_scanned: u32,
    pub completed_groups: Vec<String>,
    pub admin_adjustments: Vec<AdminAdjustment>,
    pub last_update: DateTime<Utc>,
}

impl TeamScore {
    pub fn new(team_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            base_score: 0,
            bonus_points: 0,
            current_score: 0,
            tokens_scanned: 0,
            completed_groups: Vec::new(),
            admin_adjustments: Vec::new(),
            last_update: Utc::now(),
        }
    }

    fn adjustment_total(&self) -> i64 {
        self.admin_adjustments.iter().map(|a| a.delta).sum()
    }

    /// Re-derive `current_score` from the component fields and stamp the
    /// update time.
    pub fn refresh(&mut self) {
        self.current_score = self.base_score + self.bonus_points + self.adjustment_total();
        self.last_update = Utc::now();
    }

    pub fn apply_adjustment(&mut self, delta: i64, reason: impl Into<String>) {
        self.admin_adjustments.push(AdminAdjustment {
            delta,
            reason: reason.into(),
            at: Utc::now(),
        });
        self.refresh();
    }

    /// Zero the derived fields, keeping the team identity. Admin adjustments
    /// are cleared too; a reset is a clean slate.
    pub fn reset(&mut self) {
        self.base_score = 0;
        self.bonus_points = 0;
        self.tokens_scanned = 0;
        self.completed_groups.clear();
        self.admin_adjustments.clear();
        self.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn current_score_is_sum_of_components() {
        let mut score = TeamScore::new("002");
        score.base_score = 7000;
        score.bonus_points = 7000;
        score.refresh();
        assert_eq!(score.current_score, 14000);

        score.apply_adjustment(-500, "penalty");
        assert_eq!(score.current_score, 13500);
    }

    #[test]
    fn reset_clears_everything_derived() {
        let mut score = TeamScore::new("001");
        score.base_score = 500;
        score.tokens_scanned = 1;
        score.completed_groups.push("Marcus Sucks".to_string());
        score.apply_adjustment(100, "bump");
        score.reset();
        assert_eq!(score.current_score, 0);
        assert_eq!(score.tokens_scanned, 0);
        assert!(score.completed_groups.is_empty());
        assert!(score.admin_adjustments.is_empty());
    }
}
