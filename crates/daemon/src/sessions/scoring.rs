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

//! Pure scoring arithmetic: projection rebuilds and group-completion checks.
//! The engine owns the state; nothing here mutates a session.

use std::collections::{BTreeSet, HashMap, HashSet};

use aln_common::{Session, TeamScore, TokenCatalog, TransactionStatus};

/// Token ids a team has scored (accepted, blackmarket) after its reset
/// watermark, across all devices.
pub fn team_scored_tokens(session: &Session, team_id: &str) -> HashSet<String> {
    let watermark = session.metadata.score_reset_at.get(team_id);
    session
        .transactions
        .iter()
        .filter(|tx| {
            tx.team_id == team_id
                && tx.is_scoring()
                && watermark.is_none_or(|w| tx.timestamp > *w)
        })
        .map(|tx| tx.token_id.clone())
        .collect()
}

/// Whether every token of a group appears in the scored set.
pub fn group_is_complete(catalog: &TokenCatalog, scored: &HashSet<String>, group_id: &str) -> bool {
    let members = catalog.group_members(group_id);
    !members.is_empty() && members.iter().all(|t| scored.contains(&t.id))
}

/// The bonus a completed group awards: the group's summed value times
/// `multiplier - 1`, so base plus bonus comes out to `sum x multiplier`.
pub fn group_bonus(catalog: &TokenCatalog, group_id: &str) -> i64 {
    catalog.group_value(group_id) * (catalog.group_multiplier(group_id) - 1)
}

/// Rebuild every team's projection from scratch by replaying the transaction
/// log in timestamp order. Admin adjustments are carried over from the prior
/// projections; they are not derivable from the log.
pub fn recompute_scores(
    session: &Session,
    catalog: &TokenCatalog,
    previous: &HashMap<String, TeamScore>,
) -> HashMap<String, TeamScore> {
    let mut scores: HashMap<String, TeamScore> = session
        .teams
        .iter()
        .map(|team_id| {
            let mut score = TeamScore::new(team_id.clone());
            if let Some(prior) = previous.get(team_id) {
                score.admin_adjustments = prior.admin_adjustments.clone();
            }
            (team_id.clone(), score)
        })
        .collect();

    let mut replay: Vec<_> = session.transactions.iter().collect();
    replay.sort_by_key(|tx| tx.timestamp);

    let mut scored_by_team: HashMap<String, HashSet<String>> = HashMap::new();
    for tx in replay {
        if !tx.is_scoring() {
            continue;
        }
        let watermark = session.metadata.score_reset_at.get(&tx.team_id);
        if watermark.is_some_and(|w| tx.timestamp <= *w) {
            continue;
        }
        let Some(score) = scores.get_mut(&tx.team_id) else {
            continue;
        };
        score.base_score += tx.points;
        score.tokens_scanned += 1;
        let scored = scored_by_team.entry(tx.team_id.clone()).or_default();
        scored.insert(tx.token_id.clone());

        if let Some(group_id) = catalog.get(&tx.token_id).and_then(|t| t.group_id.clone())
            && !score.completed_groups.contains(&group_id)
            && group_is_complete(catalog, scored, &group_id)
        {
            score.bonus_points += group_bonus(catalog, &group_id);
            score.completed_groups.push(group_id);
        }
    }

    for score in scores.values_mut() {
        score.refresh();
    }
    scores
}

/// Rebuild the per-device duplicate-detection sets from the remaining log.
/// Used after a transaction delete so the device may legitimately rescan.
pub fn rebuild_device_scan_sets(session: &Session) -> HashMap<String, BTreeSet<String>> {
    let mut sets: HashMap<String, BTreeSet<String>> = HashMap::new();
    for tx in &session.transactions {
        if tx.status == TransactionStatus::Accepted {
            sets.entry(tx.device_id.clone())
                .or_default()
                .insert(tx.token_id.clone());
        }
    }
    sets
}
