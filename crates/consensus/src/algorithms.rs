//! Voting algorithms and tie-breaking
//!
//! Pure functions over a round's submitted opinions; the engine decides
//! when to call them. Tie-breaking is a fixed chain of (a) aggregate
//! weight, (b) mean confidence, (c) lexicographic order, and every
//! applied step is recorded in the evaluation.

use std::collections::{HashMap, HashSet};

use sentinel_core::{ChoiceTally, ConsensusAlgorithm, ConsensusSessionConfig, Opinion};

const EPS: f64 = 1e-9;

/// Outcome of evaluating one round.
#[derive(Debug, Clone)]
pub struct RoundEvaluation {
    pub passed: bool,
    pub winner: Option<String>,
    pub tallies: Vec<ChoiceTally>,
    pub tie_breakers: Vec<String>,
    /// Winning choice's weight share of the submitted weight.
    pub agreement_ratio: f64,
    /// Submitted opinions over session participants.
    pub participation_ratio: f64,
    /// Mean confidence across submitted opinions.
    pub avg_confidence: f64,
}

impl RoundEvaluation {
    fn empty(participation_ratio: f64) -> Self {
        Self {
            passed: false,
            winner: None,
            tallies: Vec::new(),
            tie_breakers: Vec::new(),
            agreement_ratio: 0.0,
            participation_ratio,
            avg_confidence: 0.0,
        }
    }
}

/// Evaluate one round of opinions under the session's algorithm.
pub fn evaluate_round(config: &ConsensusSessionConfig, opinions: &[Opinion]) -> RoundEvaluation {
    let participant_count = config.participants.len().max(1);
    let participation_ratio = opinions.len() as f64 / participant_count as f64;

    if opinions.is_empty() || opinions.len() < config.min_participants {
        return RoundEvaluation::empty(participation_ratio);
    }

    let weights: HashMap<&str, f64> = config
        .participants
        .iter()
        .map(|p| (p.agent_id.as_str(), p.voting_weight))
        .collect();

    let avg_confidence =
        opinions.iter().map(|o| o.confidence).sum::<f64>() / opinions.len() as f64;

    match config.algorithm {
        ConsensusAlgorithm::RankedChoice => {
            ranked_choice(config, opinions, &weights, participation_ratio, avg_confidence)
        }
        algorithm => {
            let tallies = tally(opinions, &weights);
            let submitted_weight: f64 = opinions
                .iter()
                .map(|o| weights.get(o.agent_id.as_str()).copied().unwrap_or(0.0))
                .sum();

            let mut tie_breakers = Vec::new();
            let primary_is_weight = matches!(
                algorithm,
                ConsensusAlgorithm::WeightedMajority | ConsensusAlgorithm::Quorum
            );
            let winner = select_winner(&tallies, primary_is_weight, &mut tie_breakers);

            let passed = match algorithm {
                ConsensusAlgorithm::Unanimous => {
                    tallies.len() == 1 && opinions.len() == config.participants.len()
                }
                ConsensusAlgorithm::Majority => winner
                    .map(|w| w.votes as f64 > opinions.len() as f64 / 2.0)
                    .unwrap_or(false),
                ConsensusAlgorithm::WeightedMajority => winner
                    .map(|w| w.weight + EPS >= config.threshold * config.total_weight())
                    .unwrap_or(false),
                ConsensusAlgorithm::Quorum => {
                    let total_weight = config.total_weight();
                    let quorum = config.min_participants as f64 / participant_count as f64;
                    let participation_weight = if total_weight > 0.0 {
                        submitted_weight / total_weight
                    } else {
                        0.0
                    };
                    winner.is_some() && participation_weight + EPS >= quorum
                }
                ConsensusAlgorithm::RankedChoice => unreachable!(),
            };

            let agreement_ratio = match (&winner, submitted_weight) {
                (Some(w), total) if total > 0.0 => w.weight / total,
                _ => 0.0,
            };

            RoundEvaluation {
                passed,
                winner: winner.map(|w| w.decision.clone()),
                tallies,
                tie_breakers,
                agreement_ratio,
                participation_ratio,
                avg_confidence,
            }
        }
    }
}

/// Group opinions into per-choice tallies, sorted by descending weight,
/// then votes, then decision string for a stable order.
fn tally(opinions: &[Opinion], weights: &HashMap<&str, f64>) -> Vec<ChoiceTally> {
    let mut grouped: HashMap<&str, (usize, f64, f64)> = HashMap::new();
    for opinion in opinions {
        let weight = weights.get(opinion.agent_id.as_str()).copied().unwrap_or(0.0);
        let entry = grouped.entry(opinion.decision.as_str()).or_insert((0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += weight;
        entry.2 += opinion.confidence;
    }

    let mut tallies: Vec<ChoiceTally> = grouped
        .into_iter()
        .map(|(decision, (votes, weight, confidence_sum))| ChoiceTally {
            decision: decision.to_string(),
            votes,
            weight,
            avg_confidence: confidence_sum / votes as f64,
        })
        .collect();

    tallies.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.votes.cmp(&a.votes))
            .then_with(|| a.decision.cmp(&b.decision))
    });
    tallies
}

/// Pick the winning tally, recording every tie-break step applied.
fn select_winner<'a>(
    tallies: &'a [ChoiceTally],
    primary_is_weight: bool,
    tie_breakers: &mut Vec<String>,
) -> Option<&'a ChoiceTally> {
    if tallies.is_empty() {
        return None;
    }

    let mut candidates: Vec<&ChoiceTally> = if primary_is_weight {
        let max_weight = tallies.iter().map(|t| t.weight).fold(f64::MIN, f64::max);
        tallies
            .iter()
            .filter(|t| (t.weight - max_weight).abs() < EPS)
            .collect()
    } else {
        let max_votes = tallies.iter().map(|t| t.votes).max().unwrap_or(0);
        tallies.iter().filter(|t| t.votes == max_votes).collect()
    };

    if candidates.len() == 1 {
        return Some(candidates[0]);
    }

    // (a) greater aggregate weight, unless weight was the primary metric.
    if !primary_is_weight {
        let max_weight = candidates.iter().map(|t| t.weight).fold(f64::MIN, f64::max);
        candidates.retain(|t| (t.weight - max_weight).abs() < EPS);
        tie_breakers.push("vote_tie→weight".to_string());
        if candidates.len() == 1 {
            return Some(candidates[0]);
        }
    }

    // (b) greater mean confidence.
    let max_confidence = candidates
        .iter()
        .map(|t| t.avg_confidence)
        .fold(f64::MIN, f64::max);
    candidates.retain(|t| (t.avg_confidence - max_confidence).abs() < EPS);
    tie_breakers.push("weight_tie→confidence".to_string());
    if candidates.len() == 1 {
        return Some(candidates[0]);
    }

    // (c) lexicographic on the decision string.
    tie_breakers.push("confidence_tie→lexicographic".to_string());
    candidates.sort_by(|a, b| a.decision.cmp(&b.decision));
    Some(candidates[0])
}

/// Instant-runoff evaluation: eliminate the lowest-weight choice and
/// redistribute ballots by their submitted ranking until one choice
/// holds at least `threshold` of the active weight.
fn ranked_choice(
    config: &ConsensusSessionConfig,
    opinions: &[Opinion],
    weights: &HashMap<&str, f64>,
    participation_ratio: f64,
    avg_confidence: f64,
) -> RoundEvaluation {
    struct Ballot<'a> {
        weight: f64,
        confidence: f64,
        preferences: Vec<&'a str>,
    }

    let ballots: Vec<Ballot> = opinions
        .iter()
        .map(|o| Ballot {
            weight: weights.get(o.agent_id.as_str()).copied().unwrap_or(0.0),
            confidence: o.confidence,
            preferences: match &o.ranking {
                Some(ranking) => ranking.iter().map(String::as_str).collect(),
                None => vec![o.decision.as_str()],
            },
        })
        .collect();

    let mut eliminated: HashSet<&str> = HashSet::new();

    loop {
        // Current standing: each ballot counts for its best surviving
        // preference.
        let mut counts: HashMap<&str, (usize, f64, f64)> = HashMap::new();
        for ballot in &ballots {
            if let Some(choice) = ballot
                .preferences
                .iter()
                .find(|c| !eliminated.contains(*c))
            {
                let entry = counts.entry(choice).or_insert((0, 0.0, 0.0));
                entry.0 += 1;
                entry.1 += ballot.weight;
                entry.2 += ballot.confidence;
            }
        }

        if counts.is_empty() {
            return RoundEvaluation::empty(participation_ratio);
        }

        let active_weight: f64 = counts.values().map(|(_, w, _)| *w).sum();
        let mut tallies: Vec<ChoiceTally> = counts
            .iter()
            .map(|(decision, (votes, weight, confidence_sum))| ChoiceTally {
                decision: decision.to_string(),
                votes: *votes,
                weight: *weight,
                avg_confidence: confidence_sum / *votes as f64,
            })
            .collect();
        tallies.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.decision.cmp(&b.decision))
        });

        let top = &tallies[0];
        let share = if active_weight > 0.0 {
            top.weight / active_weight
        } else {
            0.0
        };

        if share + EPS >= config.threshold || tallies.len() == 1 {
            let mut tie_breakers = Vec::new();
            let winner = select_winner(&tallies, true, &mut tie_breakers);
            return RoundEvaluation {
                passed: share + EPS >= config.threshold,
                winner: winner.map(|w| w.decision.clone()),
                agreement_ratio: share,
                tallies,
                tie_breakers,
                participation_ratio,
                avg_confidence,
            };
        }

        // Eliminate the lowest-weight choice; ties eliminate the
        // lexicographically greatest so elimination stays deterministic.
        let min_weight = tallies.iter().map(|t| t.weight).fold(f64::MAX, f64::min);
        let to_eliminate = tallies
            .iter()
            .filter(|t| (t.weight - min_weight).abs() < EPS)
            .map(|t| t.decision.clone())
            .max()
            .expect("non-empty tallies");
        // Borrow juggling: find the matching &str key inside ballots.
        let key = ballots
            .iter()
            .flat_map(|b| b.preferences.iter())
            .find(|c| **c == to_eliminate)
            .copied()
            .expect("eliminated choice came from a ballot");
        eliminated.insert(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::ConsensusAlgorithm::*;

    fn config(algorithm: ConsensusAlgorithm, weights: &[(&str, f64)]) -> ConsensusSessionConfig {
        let mut config = ConsensusSessionConfig::new("test", algorithm);
        for (agent, weight) in weights {
            config = config.with_participant(*agent, *weight);
        }
        config
    }

    #[test]
    fn test_majority_two_to_one() {
        let config = config(Majority, &[("p1", 1.0), ("p2", 1.0), ("p3", 1.0)]);
        let opinions = vec![
            Opinion::new("p1", "approve", 0.9),
            Opinion::new("p2", "approve", 0.8),
            Opinion::new("p3", "reject", 0.7),
        ];
        let eval = evaluate_round(&config, &opinions);
        assert!(eval.passed);
        assert_eq!(eval.winner.as_deref(), Some("approve"));
        assert!((eval.agreement_ratio - 2.0 / 3.0).abs() < EPS);
        assert!(eval.tie_breakers.is_empty());
    }

    #[test]
    fn test_weighted_majority_weight_tie_breaks_on_confidence() {
        let config = config(
            WeightedMajority,
            &[("p1", 2.0), ("p2", 1.0), ("p3", 2.0), ("p4", 1.0)],
        )
        .with_threshold(0.5);
        let opinions = vec![
            Opinion::new("p1", "A", 0.9),
            Opinion::new("p2", "A", 0.7),
            Opinion::new("p3", "B", 0.9),
            Opinion::new("p4", "B", 0.6),
        ];
        let eval = evaluate_round(&config, &opinions);
        assert!(eval.passed);
        assert_eq!(eval.winner.as_deref(), Some("A"));
        assert_eq!(eval.tie_breakers, vec!["weight_tie→confidence".to_string()]);
    }

    #[test]
    fn test_full_tie_falls_through_to_lexicographic() {
        let config = config(Majority, &[("p1", 1.0), ("p2", 1.0)]);
        let opinions = vec![
            Opinion::new("p1", "zeta", 0.8),
            Opinion::new("p2", "alpha", 0.8),
        ];
        let eval = evaluate_round(&config, &opinions);
        assert_eq!(eval.winner.as_deref(), Some("alpha"));
        assert_eq!(
            eval.tie_breakers,
            vec![
                "vote_tie→weight".to_string(),
                "weight_tie→confidence".to_string(),
                "confidence_tie→lexicographic".to_string(),
            ]
        );
        // A 1-1 split is not a majority.
        assert!(!eval.passed);
    }

    #[test]
    fn test_unanimous_single_participant() {
        let config = config(Unanimous, &[("solo", 1.0)]);
        let opinions = vec![Opinion::new("solo", "approve", 0.6)];
        let eval = evaluate_round(&config, &opinions);
        assert!(eval.passed);
        assert_eq!(eval.agreement_ratio, 1.0);
    }

    #[test]
    fn test_unanimous_requires_full_agreement() {
        let config = config(Unanimous, &[("p1", 1.0), ("p2", 1.0)]);
        let opinions = vec![
            Opinion::new("p1", "approve", 0.9),
            Opinion::new("p2", "reject", 0.9),
        ];
        assert!(!evaluate_round(&config, &opinions).passed);

        // An abstention also blocks unanimity.
        let partial = vec![Opinion::new("p1", "approve", 0.9)];
        assert!(!evaluate_round(&config, &partial).passed);
    }

    #[test]
    fn test_quorum_unmet_fails() {
        let config = config(Quorum, &[("p1", 1.0), ("p2", 1.0), ("p3", 1.0), ("p4", 1.0)])
            .with_min_participants(3);
        let opinions = vec![
            Opinion::new("p1", "approve", 0.9),
            Opinion::new("p2", "approve", 0.9),
        ];
        let eval = evaluate_round(&config, &opinions);
        assert!(!eval.passed);
    }

    #[test]
    fn test_quorum_met_highest_weight_wins() {
        let config = config(Quorum, &[("p1", 3.0), ("p2", 1.0), ("p3", 1.0)])
            .with_min_participants(2);
        let opinions = vec![
            Opinion::new("p1", "hold", 0.8),
            Opinion::new("p2", "release", 0.9),
            Opinion::new("p3", "release", 0.9),
        ];
        let eval = evaluate_round(&config, &opinions);
        assert!(eval.passed);
        assert_eq!(eval.winner.as_deref(), Some("hold"));
    }

    #[test]
    fn test_ranked_choice_elimination_redistributes() {
        let config = config(
            RankedChoice,
            &[("p1", 1.0), ("p2", 1.0), ("p3", 1.0), ("p4", 1.0), ("p5", 1.0)],
        )
        .with_threshold(0.6);
        let opinions = vec![
            Opinion::new("p1", "A", 0.9).with_ranking(vec!["A".into(), "B".into()]),
            Opinion::new("p2", "A", 0.9).with_ranking(vec!["A".into(), "C".into()]),
            Opinion::new("p3", "B", 0.8).with_ranking(vec!["B".into(), "A".into()]),
            Opinion::new("p4", "C", 0.7).with_ranking(vec!["C".into(), "A".into()]),
            Opinion::new("p5", "B", 0.8).with_ranking(vec!["B".into(), "C".into()]),
        ];
        // First count: A=2, B=2, C=1 -> eliminate C -> p4 transfers to A.
        // Second count: A=3/5 = 0.6 >= threshold.
        let eval = evaluate_round(&config, &opinions);
        assert!(eval.passed);
        assert_eq!(eval.winner.as_deref(), Some("A"));
        assert!((eval.agreement_ratio - 0.6).abs() < EPS);
    }

    #[test]
    fn test_confidence_formula_bounded() {
        let config = config(Majority, &[("p1", 1.0), ("p2", 1.0), ("p3", 1.0)]);
        let opinions = vec![
            Opinion::new("p1", "approve", 0.9),
            Opinion::new("p2", "approve", 0.8),
        ];
        let eval = evaluate_round(&config, &opinions);
        let confidence =
            (eval.agreement_ratio * eval.participation_ratio * eval.avg_confidence).min(1.0);
        assert!(confidence > 0.0 && confidence <= 1.0);
        assert!((eval.participation_ratio - 2.0 / 3.0).abs() < EPS);
    }

    #[test]
    fn test_below_min_participants_never_passes() {
        let config = config(Majority, &[("p1", 1.0), ("p2", 1.0), ("p3", 1.0)])
            .with_min_participants(3);
        let opinions = vec![
            Opinion::new("p1", "approve", 0.9),
            Opinion::new("p2", "approve", 0.9),
        ];
        assert!(!evaluate_round(&config, &opinions).passed);
    }
}
