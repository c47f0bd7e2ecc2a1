//! Combo aggregation over adjusted base projections

use std::collections::BTreeMap;

use crate::config::ComboConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{ComboProjection, Projection, StatCode};

/// Covariance for an unordered stat pair; unlisted pairs are independent
fn covariance(cfg: &ComboConfig, a: StatCode, b: StatCode) -> f64 {
    cfg.covariance
        .iter()
        .find(|c| (c.a == a && c.b == b) || (c.a == b && c.b == a))
        .map(|c| c.covariance)
        .unwrap_or(0.0)
}

/// Build every configured combo for one player/game.
///
/// Value is the weighted sum of adjusted constituents; variance is
/// `sum(w^2 var) + 2 sum(w_a w_b cov)`. Fails with `Configuration` when a
/// combo names a stat with no projection.
pub fn aggregate_combos(
    projections: &[Projection],
    cfg: &ComboConfig,
) -> PipelineResult<Vec<ComboProjection>> {
    let by_stat: BTreeMap<StatCode, &Projection> =
        projections.iter().map(|p| (p.stat, p)).collect();
    let Some(player_id) = projections.first().map(|p| p.player_id) else {
        return Ok(Vec::new());
    };

    let mut combos = Vec::with_capacity(cfg.definitions.len());
    for def in &cfg.definitions {
        let mut value = 0.0;
        let mut variance = 0.0;
        for stat in def.stat_set() {
            let p = by_stat.get(&stat).ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "combo {} references {} but player {} has no {} projection",
                    def.code, stat, player_id, stat
                ))
            })?;
            let w = def.weight(stat);
            value += w * p.adjusted_value;
            variance += w * w * p.variance;
        }

        let stats: Vec<StatCode> = def.stat_set().into_iter().collect();
        for (i, a) in stats.iter().enumerate() {
            for b in &stats[i + 1..] {
                variance += 2.0 * def.weight(*a) * def.weight(*b) * covariance(cfg, *a, *b);
            }
        }

        combos.push(ComboProjection {
            player_id,
            combo: def.code.clone(),
            stats,
            value,
            variance: variance.max(0.0),
        });
    }
    Ok(combos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComboDefinition, CovarianceEntry};
    use crate::types::ComboCode;
    use chrono::Utc;

    fn proj(stat: StatCode, value: f64, variance: f64) -> Projection {
        Projection {
            player_id: 3,
            stat,
            raw_value: Some(value),
            adjusted_value: value,
            minutes_estimate: 32.0,
            variance,
            model_version: "proj-test".into(),
            timestamp: Utc::now(),
            adjustments: Vec::new(),
        }
    }

    fn full_set() -> Vec<Projection> {
        vec![
            proj(StatCode::Pts, 24.5, 30.0),
            proj(StatCode::Reb, 7.0, 6.0),
            proj(StatCode::Ast, 5.5, 4.0),
            proj(StatCode::Stl, 1.2, 1.0),
            proj(StatCode::Blk, 0.6, 0.5),
            proj(StatCode::Tov, 2.8, 2.0),
        ]
    }

    #[test]
    fn test_combo_value_is_sum_of_constituents() {
        let combos = aggregate_combos(&full_set(), &ComboConfig::default()).unwrap();
        let pra = combos
            .iter()
            .find(|c| c.combo == ComboCode::new("PRA"))
            .unwrap();
        assert!((pra.value - 37.0).abs() < 1e-9);
        assert!((pra.variance - 40.0).abs() < 1e-9);
        assert_eq!(pra.stats, vec![StatCode::Pts, StatCode::Reb, StatCode::Ast]);
    }

    #[test]
    fn test_duplicate_constituent_counted_once() {
        let cfg = ComboConfig {
            definitions: vec![ComboDefinition::new(
                "PR",
                &[StatCode::Pts, StatCode::Reb, StatCode::Pts],
            )],
            covariance: Vec::new(),
        };
        let combos = aggregate_combos(&full_set(), &cfg).unwrap();
        assert!((combos[0].value - 31.5).abs() < 1e-9);
    }

    #[test]
    fn test_covariance_override_adds_pair_term() {
        let cfg = ComboConfig {
            definitions: vec![ComboDefinition::new("PR", &[StatCode::Pts, StatCode::Reb])],
            covariance: vec![CovarianceEntry {
                a: StatCode::Reb,
                b: StatCode::Pts,
                covariance: 1.5,
            }],
        };
        let combos = aggregate_combos(&full_set(), &cfg).unwrap();
        assert!((combos[0].variance - 39.0).abs() < 1e-9);
        assert!((combos[0].value - 31.5).abs() < 1e-9);
    }

    #[test]
    fn test_fantasy_uses_scoring_weights() {
        let combos = aggregate_combos(&full_set(), &ComboConfig::default()).unwrap();
        let fantasy = combos
            .iter()
            .find(|c| c.combo == ComboCode::new("FANTASY"))
            .unwrap();
        // 24.5 + 1.2*7 + 1.5*5.5 + 3*1.2 + 3*0.6
        assert!((fantasy.value - 46.55).abs() < 1e-9);
        // 30 + 1.44*6 + 2.25*4 + 9*1 + 9*0.5
        assert!((fantasy.variance - 61.14).abs() < 1e-9);
        assert!(!fantasy.stats.contains(&StatCode::Tov));
    }

    #[test]
    fn test_missing_constituent_is_configuration_error() {
        let projections: Vec<_> = full_set()
            .into_iter()
            .filter(|p| p.stat != StatCode::Ast)
            .collect();
        let err = aggregate_combos(&projections, &ComboConfig::default()).unwrap_err();
        assert!(err.is_fatal());
    }
}
