use std::{cmp::Ordering, collections::BTreeSet, time::SystemTime};

use uuid::Uuid;

/// Identifier of a challenge in the catalog.
pub type ChallengeId = u32;

/// A graded exercise every team can attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Stable identifier referenced by submissions.
    pub id: ChallengeId,
    /// Display name.
    pub name: String,
    /// One-line description.
    pub description: String,
}

/// The fixed set of challenges for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeCatalog {
    challenges: Vec<Challenge>,
}

impl ChallengeCatalog {
    /// Build a catalog, dropping duplicate ids (first one wins).
    pub fn new(challenges: Vec<Challenge>) -> Self {
        let mut seen = BTreeSet::new();
        let challenges = challenges
            .into_iter()
            .filter(|challenge| seen.insert(challenge.id))
            .collect();
        Self { challenges }
    }

    /// Whether `id` names a challenge of this catalog.
    pub fn contains(&self, id: ChallengeId) -> bool {
        self.challenges.iter().any(|challenge| challenge.id == id)
    }

    /// Challenges in catalog order.
    pub fn challenges(&self) -> &[Challenge] {
        &self.challenges
    }

    /// Number of challenges.
    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    /// Whether the catalog has no challenges.
    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

impl Default for ChallengeCatalog {
    fn default() -> Self {
        let builtin = [
            (1, "Bubble Sort", "Visualizer Engine"),
            (2, "Merge Sort", "Recursive Logic"),
            (3, "Quick Sort", "Partitioning"),
            (4, "Pathfinding", "BFS/DFS Traversal"),
            (5, "Dijkstra", "Shortest Path"),
        ];
        Self::new(
            builtin
                .into_iter()
                .map(|(id, name, description)| Challenge {
                    id,
                    name: name.into(),
                    description: description.into(),
                })
                .collect(),
        )
    }
}

/// Progress of a team on a single challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    /// Not submitted yet.
    Available,
    /// Submitted and waiting for the operator.
    Pending,
    /// Graded and accepted.
    Completed,
}

/// A registered team and its progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    /// Identifier assigned at registration.
    pub id: Uuid,
    /// Display label.
    pub name: String,
    /// Accumulated points.
    pub score: u64,
    /// Challenges graded and accepted.
    pub completed_challenges: BTreeSet<ChallengeId>,
    /// Challenges waiting for grading.
    pub pending_challenge_ids: BTreeSet<ChallengeId>,
    /// Last submitted evidence link.
    pub submission_url: Option<String>,
    /// Set on submit, cleared on grade.
    pub pending_submission: bool,
    /// Registration time.
    pub joined_at: SystemTime,
    /// Time of the last submission.
    pub last_active_at: Option<SystemTime>,
}

impl Team {
    /// A freshly registered team without progress.
    pub fn new(id: Uuid, name: impl Into<String>, joined_at: SystemTime) -> Self {
        Self {
            id,
            name: name.into(),
            score: 0,
            completed_challenges: BTreeSet::new(),
            pending_challenge_ids: BTreeSet::new(),
            submission_url: None,
            pending_submission: false,
            joined_at,
            last_active_at: None,
        }
    }

    /// Whether any submission waits for grading.
    pub fn has_pending(&self) -> bool {
        !self.pending_challenge_ids.is_empty()
    }

    /// Whether every challenge of `catalog` is completed.
    pub fn is_complete(&self, catalog: &ChallengeCatalog) -> bool {
        !catalog.is_empty()
            && catalog
                .challenges()
                .iter()
                .all(|challenge| self.completed_challenges.contains(&challenge.id))
    }

    /// Progress on a single challenge; completion wins over a stale pending entry.
    pub fn challenge_state(&self, id: ChallengeId) -> ChallengeState {
        if self.completed_challenges.contains(&id) {
            ChallengeState::Completed
        } else if self.pending_challenge_ids.contains(&id) {
            ChallengeState::Pending
        } else {
            ChallengeState::Available
        }
    }

    /// Case-insensitive substring match on the team name.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        needle.is_empty() || self.name.to_lowercase().contains(&needle)
    }
}

/// Review-queue ordering: pending work first, then fully complete, then newest, then id.
pub fn review_order(a: &Team, b: &Team, catalog: &ChallengeCatalog) -> Ordering {
    b.has_pending()
        .cmp(&a.has_pending())
        .then_with(|| b.is_complete(catalog).cmp(&a.is_complete(catalog)))
        .then_with(|| b.joined_at.cmp(&a.joined_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort `teams` into review-queue order.
pub fn sort_review_queue(teams: &mut [Team], catalog: &ChallengeCatalog) {
    teams.sort_by(|a, b| review_order(a, b, catalog));
}

/// Leaderboard ordering: score desc, then earliest registration.
pub fn leaderboard_order(a: &Team, b: &Team) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.joined_at.cmp(&b.joined_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Aggregate counters shown on the operator console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RosterMetrics {
    /// Registered teams.
    pub total: usize,
    /// Teams with at least one pending submission.
    pub pending_review: usize,
    /// Teams that still have challenges left.
    pub active: usize,
    /// Teams that completed every challenge.
    pub finished: usize,
}

/// Compute [`RosterMetrics`] for a roster.
pub fn roster_metrics(teams: &[Team], catalog: &ChallengeCatalog) -> RosterMetrics {
    teams.iter().fold(
        RosterMetrics {
            total: teams.len(),
            ..RosterMetrics::default()
        },
        |mut metrics, team| {
            if team.has_pending() {
                metrics.pending_review += 1;
            }
            if team.is_complete(catalog) {
                metrics.finished += 1;
            } else {
                metrics.active += 1;
            }
            metrics
        },
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn team(name: &str, joined_secs: u64) -> Team {
        Team::new(
            Uuid::new_v4(),
            name,
            SystemTime::UNIX_EPOCH + Duration::from_secs(joined_secs),
        )
    }

    #[test]
    fn default_catalog_has_five_challenges() {
        let catalog = ChallengeCatalog::default();
        assert_eq!(catalog.len(), 5);
        assert!(catalog.contains(3));
        assert!(!catalog.contains(6));
    }

    #[test]
    fn duplicate_challenge_ids_are_dropped() {
        let make = |id, name: &str| Challenge {
            id,
            name: name.into(),
            description: String::new(),
        };
        let catalog = ChallengeCatalog::new(vec![make(1, "a"), make(1, "b"), make(2, "c")]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.challenges()[0].name, "a");
    }

    #[test]
    fn pending_team_sorts_before_everyone_else() {
        let catalog = ChallengeCatalog::default();

        let mut finished = team("finished", 300);
        finished.completed_challenges = (1..=5).collect();
        let newest = team("newest", 500);
        let mut waiting = team("waiting", 1);
        waiting.pending_challenge_ids.insert(2);

        let mut teams = vec![newest.clone(), finished.clone(), waiting.clone()];
        sort_review_queue(&mut teams, &catalog);

        let names: Vec<_> = teams.iter().map(|team| team.name.as_str()).collect();
        assert_eq!(names, ["waiting", "finished", "newest"]);
    }

    #[test]
    fn newer_teams_come_first_among_equals() {
        let catalog = ChallengeCatalog::default();
        let mut teams = vec![team("old", 10), team("new", 20)];
        sort_review_queue(&mut teams, &catalog);
        assert_eq!(teams[0].name, "new");
    }

    #[test]
    fn metrics_count_pending_and_finished() {
        let catalog = ChallengeCatalog::default();
        let mut done = team("done", 1);
        done.completed_challenges = (1..=5).collect();
        let mut busy = team("busy", 2);
        busy.pending_challenge_ids.insert(1);
        let idle = team("idle", 3);

        let metrics = roster_metrics(&[done, busy, idle], &catalog);
        assert_eq!(
            metrics,
            RosterMetrics {
                total: 3,
                pending_review: 1,
                active: 2,
                finished: 1,
            }
        );
    }

    #[test]
    fn challenge_state_prefers_completion() {
        let mut team = team("t", 0);
        team.pending_challenge_ids.insert(1);
        team.completed_challenges.insert(2);

        assert_eq!(team.challenge_state(1), ChallengeState::Pending);
        assert_eq!(team.challenge_state(2), ChallengeState::Completed);
        assert_eq!(team.challenge_state(3), ChallengeState::Available);
    }

    #[test]
    fn search_is_case_insensitive() {
        let team = team("Null Pointers", 0);
        assert!(team.matches_search("pointer"));
        assert!(team.matches_search("  "));
        assert!(!team.matches_search("segfault"));
    }

    #[test]
    fn leaderboard_breaks_ties_by_registration() {
        let mut early = team("early", 1);
        early.score = 20;
        let mut late = team("late", 2);
        late.score = 20;
        let mut best = team("best", 3);
        best.score = 40;

        let mut teams = vec![late, early, best];
        teams.sort_by(leaderboard_order);
        let names: Vec<_> = teams.iter().map(|team| team.name.as_str()).collect();
        assert_eq!(names, ["best", "early", "late"]);
    }
}
