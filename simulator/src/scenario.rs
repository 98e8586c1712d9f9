//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Start automatic polling.
    Start,
    /// Stop automatic polling.
    Stop,
    /// Request an immediate poll.
    Poll,
    /// Drop all cached rates.
    Wipe,
    /// Replace the tracked pairs (`FROM/TO` keys).
    TrackPairs { pairs: Vec<String> },
    /// Change the simulated provider failure rate.
    SetFailureRate { rate: f64 },
    /// Wait until no load is outstanding.
    AwaitIdle { timeout_ms: u64 },
    /// Log a countervalue report for the current state.
    Report,
}

impl Scenario {
    /// Load a built-in scenario by name, or a JSON scenario file by path.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "steady" => Ok(Self::steady()),
            "settings-change" => Ok(Self::settings_change()),
            "wipe" => Ok(Self::wipe()),
            path if path.ends_with(".json") => {
                let json = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&json)?)
            }
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Automatic polling with a healthy provider.
    fn steady() -> Self {
        Self {
            name: "steady".to_string(),
            description: "Automatic polling against a healthy provider".to_string(),
            steps: vec![
                ScenarioStep::Start,
                ScenarioStep::AwaitIdle { timeout_ms: 5_000 },
                ScenarioStep::Wait { millis: 3_000 },
                ScenarioStep::Poll,
                ScenarioStep::AwaitIdle { timeout_ms: 5_000 },
                ScenarioStep::Report,
                ScenarioStep::Stop,
            ],
        }
    }

    /// Tracked pairs change while polling, then the provider degrades.
    fn settings_change() -> Self {
        Self {
            name: "settings-change".to_string(),
            description: "Add and remove tracked pairs while polling".to_string(),
            steps: vec![
                ScenarioStep::Start,
                ScenarioStep::AwaitIdle { timeout_ms: 5_000 },
                ScenarioStep::Report,
                ScenarioStep::TrackPairs {
                    pairs: vec!["BTC/USD".to_string(), "ETH/EUR".to_string(), "XTZ/USD".to_string()],
                },
                ScenarioStep::AwaitIdle { timeout_ms: 5_000 },
                ScenarioStep::SetFailureRate { rate: 0.5 },
                ScenarioStep::Poll,
                ScenarioStep::AwaitIdle { timeout_ms: 5_000 },
                ScenarioStep::Report,
                ScenarioStep::SetFailureRate { rate: 0.0 },
                ScenarioStep::Stop,
            ],
        }
    }

    /// Wipe while a load is outstanding, then recover.
    fn wipe() -> Self {
        Self {
            name: "wipe".to_string(),
            description: "Wipe the cache mid-fetch and reload".to_string(),
            steps: vec![
                ScenarioStep::Poll,
                ScenarioStep::AwaitIdle { timeout_ms: 5_000 },
                ScenarioStep::Report,
                ScenarioStep::Poll,
                ScenarioStep::Wipe,
                ScenarioStep::AwaitIdle { timeout_ms: 5_000 },
                ScenarioStep::Report,
                ScenarioStep::Poll,
                ScenarioStep::AwaitIdle { timeout_ms: 5_000 },
                ScenarioStep::Report,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_scenarios_load() {
        for name in ["steady", "settings-change", "wipe"] {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(scenario.name, name);
            assert!(!scenario.steps.is_empty());
        }
        assert!(Scenario::load("nope").is_err());
    }

    #[test]
    fn test_steps_json_shape() {
        let step: ScenarioStep =
            serde_json::from_str(r#"{"step": "track_pairs", "pairs": ["BTC/USD"]}"#).unwrap();
        assert_eq!(step, ScenarioStep::TrackPairs { pairs: vec!["BTC/USD".to_string()] });

        let json = serde_json::to_value(&ScenarioStep::Wipe).unwrap();
        assert_eq!(json, serde_json::json!({"step": "wipe"}));
    }
}
