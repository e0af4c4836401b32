//! Fuzzy name matching for direct tool invocation.

/// Scores `query` against `target`, case-insensitively, walking the target
/// left-to-right and consuming query characters in order.
///
/// Per matched character: +1; +2 when the match sits on a word boundary
/// (position 0, after `_`/`-`, or a lower-to-upper transition in the original
/// casing); +3 when directly after the previous match; otherwise -0.5 per
/// character skipped since the previous match. A query whose first character
/// matches position 0 earns +5. A query that does not fully match scores 0.
pub fn fuzzy_score(query: &str, target: &str) -> f64 {
    let q: Vec<char> = query.to_lowercase().chars().collect();
    if q.is_empty() {
        return 0.0;
    }
    let t_orig: Vec<char> = target.chars().collect();
    let t: Vec<char> = target.to_lowercase().chars().collect();

    let mut score = 0.0;
    let mut qi = 0usize;
    let mut last_match: Option<usize> = None;

    for ti in 0..t.len() {
        if qi >= q.len() {
            break;
        }
        if t[ti] != q[qi] {
            continue;
        }

        score += 1.0;

        let boundary = ti == 0
            || matches!(t_orig[ti - 1], '_' | '-')
            || (t_orig[ti - 1].is_lowercase() && t_orig[ti].is_uppercase());
        if boundary {
            score += 2.0;
        }

        match last_match {
            Some(last) if ti == last + 1 => score += 3.0,
            Some(last) => score -= 0.5 * ((ti - last - 1) as f64),
            None => {}
        }

        if qi == 0 && ti == 0 {
            score += 5.0;
        }

        last_match = Some(ti);
        qi += 1;
    }

    if qi < q.len() {
        return 0.0;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_query_scores_zero() {
        assert_eq!(fuzzy_score("xyz", "chess_create_game"), 0.0);
        assert_eq!(fuzzy_score("", "anything"), 0.0);
    }

    #[test]
    fn exact_prefix_beats_scattered_match() {
        let prefix = fuzzy_score("chess", "chess_create_game");
        let scattered = fuzzy_score("chess", "cheap_estimates_spread");
        assert!(prefix > scattered, "{prefix} vs {scattered}");
    }

    #[test]
    fn first_char_at_position_zero_gets_the_bonus() {
        let anchored = fuzzy_score("c", "create");
        let unanchored = fuzzy_score("r", "create");
        assert!(anchored > unanchored);
        // +1 match, +2 boundary, +5 anchor.
        assert_eq!(anchored, 8.0);
    }

    #[test]
    fn word_boundaries_reward_underscore_starts() {
        // 'm' at the start of "move" (after '_') vs 'o' mid-word.
        let boundary = fuzzy_score("m", "chess_move");
        let mid = fuzzy_score("o", "chess_move");
        assert!(boundary > mid);
    }

    #[test]
    fn camel_case_transition_counts_as_boundary() {
        // 'G' in "createGame" sits on a lower-to-upper transition.
        let camel = fuzzy_score("g", "createGame");
        assert_eq!(camel, 3.0);
    }

    #[test]
    fn skipped_characters_cost_half_a_point() {
        // "cg" on "chess_game": c at 0 (+1+2+5), g at 6 (+1+2 boundary, -0.5*5 skipped).
        let score = fuzzy_score("cg", "chess_game");
        assert_eq!(score, 8.5);
    }

    #[test]
    fn consecutive_matches_earn_the_run_bonus() {
        // "cr" on "create": c (+1+2+5), r consecutive (+1+3).
        assert_eq!(fuzzy_score("cr", "create"), 12.0);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(fuzzy_score("CR", "create"), fuzzy_score("cr", "create"));
    }
}
