//! Observation/action spaces and the per-agent split of flat vectors.

use crate::error::{EnvError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type AgentIndex = usize;
pub type ActionValue = Vec<f64>;

/// Uniform draw from `[low, high)`. Infinite bounds are clamped to the
/// finite range, and spans too wide for `gen_range` are interpolated.
fn sample_interval<R: Rng>(low: f64, high: f64, rng: &mut R) -> f64 {
    let low = low.max(f64::MIN);
    let high = high.min(f64::MAX);
    if !(high > low) {
        return low;
    }
    if (high - low).is_finite() {
        return rng.gen_range(low..high);
    }
    let t: f64 = rng.r#gen();
    low * (1.0 - t) + high * t
}

/// Number of named columns every per-agent observation row starts with.
pub const OBS_FIELDS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Space {
    Box {
        low: f64,
        high: f64,
        shape: Vec<usize>,
    },
    Discrete {
        n: usize,
    },
    Tuple(Vec<Space>),
}

impl Space {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Space::Box { shape, .. } => shape.clone(),
            Space::Discrete { .. } => vec![1],
            Space::Tuple(spaces) => vec![spaces.iter().map(Space::flat_dim).sum()],
        }
    }

    pub fn flat_dim(&self) -> usize {
        match self {
            Space::Box { shape, .. } => shape.iter().product(),
            Space::Discrete { .. } => 1,
            Space::Tuple(spaces) => spaces.iter().map(Space::flat_dim).sum(),
        }
    }

    /// Uniform sample, flattened.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        match self {
            Space::Box { low, high, shape } => {
                let len: usize = shape.iter().product();
                (0..len).map(|_| sample_interval(*low, *high, rng)).collect()
            }
            Space::Discrete { n } => vec![rng.gen_range(0..(*n).max(1)) as f64],
            Space::Tuple(spaces) => spaces.iter().flat_map(|s| s.sample(rng)).collect(),
        }
    }

    /// Slice the multi-agent observation space down to a single row.
    pub(crate) fn per_agent_observation(&self, n_agents: usize) -> Result<(Space, usize)> {
        let Space::Box { low, high, shape } = self else {
            return Err(EnvError::Config(
                "observation space must be a Box".to_string(),
            ));
        };

        let width = match shape.as_slice() {
            [agents, width] => {
                if *agents != n_agents {
                    return Err(EnvError::shape("observation rows", n_agents, *agents));
                }
                *width
            }
            [flat] => {
                if n_agents == 0 || flat % n_agents != 0 {
                    return Err(EnvError::shape(
                        "observation length",
                        n_agents * (flat / n_agents.max(1)),
                        *flat,
                    ));
                }
                flat / n_agents
            }
            _ => {
                return Err(EnvError::Config(format!(
                    "unsupported observation shape {:?}",
                    shape
                )));
            }
        };

        if width < OBS_FIELDS {
            return Err(EnvError::shape("observation width", OBS_FIELDS, width));
        }

        let space = Space::Box {
            low: *low,
            high: *high,
            shape: vec![width],
        };
        Ok((space, width))
    }

    pub(crate) fn per_agent_action(&self, n_agents: usize) -> Result<(Space, usize)> {
        match self {
            Space::Tuple(spaces) => {
                if spaces.len() != n_agents {
                    return Err(EnvError::shape("action tuple", n_agents, spaces.len()));
                }
                let first = spaces
                    .first()
                    .ok_or_else(|| EnvError::Config("empty action tuple".to_string()))?;
                let width = first.flat_dim();
                if let Some(bad) = spaces.iter().find(|s| s.flat_dim() != width) {
                    return Err(EnvError::shape("action width", width, bad.flat_dim()));
                }
                Ok((first.clone(), width))
            }
            Space::Box { low, high, shape } => match shape.as_slice() {
                [agents, width] if *agents == n_agents => Ok((
                    Space::Box {
                        low: *low,
                        high: *high,
                        shape: vec![*width],
                    },
                    *width,
                )),
                [agents, _] => Err(EnvError::shape("action rows", n_agents, *agents)),
                [flat] if n_agents > 0 && flat % n_agents == 0 => Ok((
                    Space::Box {
                        low: *low,
                        high: *high,
                        shape: vec![flat / n_agents],
                    },
                    flat / n_agents,
                )),
                _ => Err(EnvError::Config(format!(
                    "unsupported action shape {:?}",
                    shape
                ))),
            },
            Space::Discrete { .. } if n_agents == 1 => Ok((self.clone(), 1)),
            Space::Discrete { .. } => Err(EnvError::Config(
                "a single discrete action space cannot serve several agents".to_string(),
            )),
        }
    }
}

/// One agent's row of the flat observation. Column order is fixed by the
/// simulator: tx rate, its EWMA, latency, loss rate, then anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub tx_rate: f64,
    pub tx_rate_ewma: f64,
    pub latency: f64,
    pub loss_rate: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<f64>,
}

impl ObservationRecord {
    fn from_row(row: &[f64]) -> Self {
        Self {
            tx_rate: row[0],
            tx_rate_ewma: row[1],
            latency: row[2],
            loss_rate: row[3],
            extra: row[OBS_FIELDS..].to_vec(),
        }
    }

    pub fn width(&self) -> usize {
        OBS_FIELDS + self.extra.len()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.width());
        row.extend([self.tx_rate, self.tx_rate_ewma, self.latency, self.loss_rate]);
        row.extend_from_slice(&self.extra);
        row
    }
}

/// Row-major reshape: agent `i` owns `flat[i*width..(i+1)*width]`.
pub fn split_observations(
    flat: &[f64],
    n_agents: usize,
    per_agent_width: usize,
) -> Result<BTreeMap<AgentIndex, ObservationRecord>> {
    if per_agent_width < OBS_FIELDS {
        return Err(EnvError::shape("observation width", OBS_FIELDS, per_agent_width));
    }
    let expected = n_agents * per_agent_width;
    if flat.len() != expected {
        return Err(EnvError::shape("observation length", expected, flat.len()));
    }

    Ok(flat
        .chunks_exact(per_agent_width)
        .enumerate()
        .map(|(i, row)| (i, ObservationRecord::from_row(row)))
        .collect())
}

/// Inverse of [`split_observations`].
pub fn flatten_observations(observations: &BTreeMap<AgentIndex, ObservationRecord>) -> Vec<f64> {
    observations.values().flat_map(|o| o.to_vec()).collect()
}

/// Concatenate per-agent actions in ascending index order. Every index in
/// `0..n_agents` must be present; extra indices are ignored.
pub fn flatten_actions(
    actions: &BTreeMap<AgentIndex, ActionValue>,
    n_agents: usize,
    action_width: usize,
) -> Result<Vec<f64>> {
    let mut flat = Vec::with_capacity(n_agents * action_width);

    for i in 0..n_agents {
        let action = actions.get(&i).ok_or(EnvError::IncompleteAction(i))?;
        if action.len() != action_width {
            return Err(EnvError::shape("action width", action_width, action.len()));
        }
        flat.extend_from_slice(action);
    }

    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn split_is_row_major() {
        let flat: Vec<f64> = (0..10).map(|v| v as f64).collect();
        let obs = split_observations(&flat, 2, 5).unwrap();

        assert_eq!(obs.len(), 2);
        assert_eq!(obs[&0].tx_rate, 0.0);
        assert_eq!(obs[&0].loss_rate, 3.0);
        assert_eq!(obs[&0].extra, vec![4.0]);
        assert_eq!(obs[&1].tx_rate, 5.0);
        assert_eq!(obs[&1].tx_rate_ewma, 6.0);
        assert_eq!(obs[&1].latency, 7.0);
    }

    #[test]
    fn split_rejects_wrong_length() {
        let err = split_observations(&[0.0; 7], 2, 4).unwrap_err();
        assert!(matches!(err, EnvError::Shape { expected: 8, actual: 7, .. }));
    }

    #[test]
    fn split_rejects_narrow_rows() {
        assert!(matches!(
            split_observations(&[0.0; 6], 2, 3),
            Err(EnvError::Shape { .. })
        ));
    }

    #[test]
    fn flatten_orders_by_index() {
        let mut actions = BTreeMap::new();
        actions.insert(2, vec![3.0]);
        actions.insert(0, vec![1.0]);
        actions.insert(1, vec![2.0]);
        assert_eq!(flatten_actions(&actions, 3, 1).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn flatten_reports_missing_agent() {
        let mut actions = BTreeMap::new();
        actions.insert(0, vec![1.0]);
        actions.insert(2, vec![1.0]);
        assert!(matches!(
            flatten_actions(&actions, 3, 1),
            Err(EnvError::IncompleteAction(1))
        ));
    }

    #[test]
    fn flatten_checks_action_width() {
        let actions = BTreeMap::from([(0, vec![1.0, 2.0])]);
        assert!(matches!(
            flatten_actions(&actions, 1, 1),
            Err(EnvError::Shape { .. })
        ));
    }

    #[test]
    fn per_agent_spaces_from_multi_agent_spaces() {
        let obs = Space::Box { low: 0.0, high: 1.0, shape: vec![3, 4] };
        let (single, width) = obs.per_agent_observation(3).unwrap();
        assert_eq!(width, 4);
        assert_eq!(single.shape(), vec![4]);

        let flat_obs = Space::Box { low: 0.0, high: 1.0, shape: vec![12] };
        assert_eq!(flat_obs.per_agent_observation(3).unwrap().1, 4);
        assert!(obs.per_agent_observation(2).is_err());

        let act = Space::Tuple(vec![Space::Discrete { n: 5 }; 3]);
        let (single, width) = act.per_agent_action(3).unwrap();
        assert_eq!(width, 1);
        assert_eq!(single, Space::Discrete { n: 5 });
        assert!(act.per_agent_action(4).is_err());
    }

    #[test]
    fn samples_stay_in_bounds() {
        let mut rng = rand::thread_rng();
        let space = Space::Tuple(vec![
            Space::Box { low: -1.0, high: 1.0, shape: vec![2] },
            Space::Discrete { n: 3 },
        ]);
        for _ in 0..100 {
            let s = space.sample(&mut rng);
            assert_eq!(s.len(), 3);
            assert!(s[0] >= -1.0 && s[0] < 1.0);
            assert!(s[2] == 0.0 || s[2] == 1.0 || s[2] == 2.0);
        }
    }

    #[test]
    fn samples_from_unbounded_boxes_are_finite() {
        let mut rng = rand::thread_rng();
        for (low, high) in [
            (-1.7e308, 1.7e308),
            (f64::MIN, f64::MAX),
            (f64::NEG_INFINITY, f64::INFINITY),
            (0.0, f64::INFINITY),
        ] {
            let space = Space::Box { low, high, shape: vec![4] };
            for v in space.sample(&mut rng) {
                assert!(v.is_finite(), "{v} from [{low}, {high}]");
                assert!(v >= low && v <= high);
            }
        }
    }

    #[test]
    fn degenerate_box_samples_its_lower_bound() {
        let mut rng = rand::thread_rng();
        let space = Space::Box { low: 2.0, high: 2.0, shape: vec![3] };
        assert_eq!(space.sample(&mut rng), vec![2.0; 3]);
    }

    proptest! {
        #[test]
        fn split_then_flatten_recovers_vector(
            n_agents in 1usize..8,
            width in 4usize..9,
            seed in proptest::collection::vec(-1e6f64..1e6, 64),
        ) {
            let flat: Vec<f64> = (0..n_agents * width).map(|i| seed[i % seed.len()] + i as f64).collect();
            let obs = split_observations(&flat, n_agents, width).unwrap();
            prop_assert_eq!(obs.len(), n_agents);
            prop_assert_eq!(flatten_observations(&obs), flat);
        }

        #[test]
        fn flattened_actions_have_expected_length(
            n_agents in 1usize..8,
            width in 1usize..4,
        ) {
            let actions: BTreeMap<_, _> = (0..n_agents)
                .map(|i| (i, vec![i as f64; width]))
                .collect();
            let flat = flatten_actions(&actions, n_agents, width).unwrap();
            prop_assert_eq!(flat.len(), n_agents * width);
            for (i, chunk) in flat.chunks(width).enumerate() {
                prop_assert!(chunk.iter().all(|v| *v == i as f64));
            }
        }
    }
}
