//! Node statistics snapshots.
//!
//! Nodes broadcast a `stats` payload periodically. Each payload replaces
//! the previous snapshot wholesale; fields the node omits fall back to
//! their defaults rather than keeping stale values.

use serde::{Deserialize, Serialize};

/// Frames per minute a healthy player sends (50 per second).
const EXPECTED_FRAMES_PER_MINUTE: f64 = 3000.0;

/// Latest statistics reported by a node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    /// Players connected on the node.
    #[serde(default)]
    pub players: u64,
    /// Players currently producing audio.
    #[serde(default)]
    pub playing_players: u64,
    /// Node uptime in milliseconds.
    #[serde(default)]
    pub uptime: u64,
    /// Memory usage in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
    /// CPU usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuStats>,
    /// Audio frame delivery over the last minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_stats: Option<FrameStats>,
}

/// Memory section of [`NodeStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Free bytes.
    #[serde(default)]
    pub free: u64,
    /// Used bytes.
    #[serde(default)]
    pub used: u64,
    /// Allocated bytes.
    #[serde(default)]
    pub allocated: u64,
    /// Reservable bytes.
    #[serde(default)]
    pub reservable: u64,
}

/// CPU section of [`NodeStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    /// Logical cores available to the node.
    #[serde(default)]
    pub cores: u32,
    /// Whole-system load, 0.0 to 1.0.
    #[serde(default)]
    pub system_load: f64,
    /// Load caused by the node process, 0.0 to 1.0.
    #[serde(default, rename = "lavalinkLoad", alias = "processLoad")]
    pub process_load: f64,
}

/// Frame section of [`NodeStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    /// Average frames sent per player.
    #[serde(default)]
    pub sent: i64,
    /// Average frames nulled per player.
    #[serde(default)]
    pub nulled: i64,
    /// Average frames missing per player.
    #[serde(default)]
    pub deficit: i64,
}

impl NodeStats {
    /// Load penalty used to rank nodes; lower is better.
    ///
    /// Playing players count linearly. CPU load and frame loss grow
    /// exponentially so that a struggling node is avoided long before it
    /// is saturated.
    #[allow(clippy::cast_precision_loss)]
    pub fn penalty(&self) -> f64 {
        let players = self.playing_players as f64;

        let cpu = self
            .cpu
            .map_or(0.0, |cpu| 1.05_f64.powf(100.0 * cpu.system_load) * 10.0 - 10.0);

        let frames = self.frame_stats.map_or(0.0, |frames| {
            let deficit = frames.deficit.max(0) as f64 / EXPECTED_FRAMES_PER_MINUTE;
            let nulled = frames.nulled.max(0) as f64 / EXPECTED_FRAMES_PER_MINUTE;
            let deficit_penalty = 1.03_f64.powf(500.0 * deficit) * 600.0 - 600.0;
            let nulled_penalty = (1.03_f64.powf(500.0 * nulled) * 300.0 - 300.0) * 2.0;
            deficit_penalty + nulled_penalty
        });

        players + cpu + frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_full_stats() {
        let raw = json!({
            "op": "stats",
            "players": 3,
            "playingPlayers": 2,
            "uptime": 123_456,
            "memory": {"free": 1, "used": 2, "allocated": 3, "reservable": 4},
            "cpu": {"cores": 4, "systemLoad": 0.5, "lavalinkLoad": 0.25},
            "frameStats": {"sent": 3000, "nulled": 0, "deficit": 10}
        });
        let stats: NodeStats = serde_json::from_value(raw).unwrap();
        assert_eq!(stats.players, 3);
        assert_eq!(stats.playing_players, 2);
        assert_eq!(stats.uptime, 123_456);
        assert_eq!(stats.memory.unwrap().reservable, 4);
        let cpu = stats.cpu.unwrap();
        assert_eq!(cpu.cores, 4);
        assert!((cpu.process_load - 0.25).abs() < f64::EPSILON);
        assert_eq!(stats.frame_stats.unwrap().deficit, 10);
    }

    #[test]
    fn missing_sections_default() {
        let stats: NodeStats =
            serde_json::from_value(json!({"players": 1, "playingPlayers": 0})).unwrap();
        assert_eq!(stats.players, 1);
        assert!(stats.cpu.is_none());
        assert!(stats.frame_stats.is_none());
    }

    #[test]
    fn idle_node_has_zero_penalty() {
        assert!(NodeStats::default().penalty().abs() < f64::EPSILON);
    }

    #[test]
    fn playing_players_add_linearly() {
        let stats = NodeStats {
            playing_players: 7,
            ..NodeStats::default()
        };
        assert!((stats.penalty() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn busy_cpu_outweighs_a_few_players() {
        let busy = NodeStats {
            cpu: Some(CpuStats {
                cores: 2,
                system_load: 0.9,
                process_load: 0.8,
            }),
            ..NodeStats::default()
        };
        let crowded = NodeStats {
            playing_players: 5,
            ..NodeStats::default()
        };
        assert!(busy.penalty() > crowded.penalty());
    }

    #[test]
    fn frame_deficit_raises_penalty() {
        let healthy = NodeStats {
            frame_stats: Some(FrameStats::default()),
            ..NodeStats::default()
        };
        let lossy = NodeStats {
            frame_stats: Some(FrameStats {
                sent: 2000,
                nulled: 100,
                deficit: 900,
            }),
            ..NodeStats::default()
        };
        assert!(lossy.penalty() > healthy.penalty());
    }
}
