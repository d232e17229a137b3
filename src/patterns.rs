//! Breathing pattern catalog
//!
//! Static registry of the built-in breathing patterns:
//!
//! - **coherent**: Coherence 5:5, rate-controlled by the breath cycle setting
//! - **box**: Box breathing 4:4:4:4
//! - **relax_478**: Deep sleep 4-7-8
//! - **soldier**: Soldier's rest 4:8
//! - **performance**: Activation 2:2
//! - **panic_rescue**: Panic rescue 3:6 with a short out-hold

use crate::types::{BreathingPattern, PatternId, PhaseTimings};

/// The pattern whose phase lengths come from the breath cycle setting
pub const COHERENT_PATTERN: PatternId = PatternId::Coherent;

/// Pattern used when no pattern has been chosen
pub const DEFAULT_PATTERN: PatternId = PatternId::Coherent;

/// Look up a built-in pattern
pub fn pattern(id: PatternId) -> BreathingPattern {
    let (name, description, mechanism, color, timings) = match id {
        PatternId::Coherent => (
            "Coherence (5:5)",
            "Balances the autonomic nervous system. The gold standard for HRV.",
            "Balance",
            "#22d3ee",
            PhaseTimings::new(5.0, 0.0, 5.0, 0.0),
        ),
        PatternId::Box => (
            "Box Breathing (4:4:4:4)",
            "Used by Navy SEALs for focus and stress control.",
            "Focus",
            "#a78bfa",
            PhaseTimings::new(4.0, 4.0, 4.0, 4.0),
        ),
        PatternId::Relax478 => (
            "Deep Sleep (4-7-8)",
            "Extended exhale for a strong parasympathetic response.",
            "Sedation",
            "#60a5fa",
            PhaseTimings::new(4.0, 7.0, 8.0, 0.0),
        ),
        PatternId::Soldier => (
            "Soldier's Rest (4:8)",
            "Simple progressive relaxation pattern.",
            "Vagal",
            "#34d399",
            PhaseTimings::new(4.0, 0.0, 8.0, 0.0),
        ),
        PatternId::Performance => (
            "Activation (2:2)",
            "Raises alertness and sympathetic tone.",
            "Sympathetic",
            "#fb923c",
            PhaseTimings::new(2.0, 0.0, 2.0, 0.0),
        ),
        PatternId::PanicRescue => (
            "Panic Rescue (3:6)",
            "Quickly reduces acute anxiety.",
            "Acute Rescue",
            "#f87171",
            PhaseTimings::new(3.0, 0.0, 6.0, 1.0),
        ),
    };

    BreathingPattern {
        id,
        name: name.to_string(),
        description: description.to_string(),
        mechanism: mechanism.to_string(),
        color: color.to_string(),
        timings,
    }
}

/// All built-in patterns in display order
pub fn catalog() -> Vec<BreathingPattern> {
    PatternId::ALL.iter().map(|&id| pattern(id)).collect()
}
