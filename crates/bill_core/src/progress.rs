use serde::Serialize;

/// Legislative progress, ordered from least to most advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Stage {
    Introduced,
    ReferredToCommittee,
    PassedHouse,
    ReceivedInSenate,
    PassedSenate,
    Enacted,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Introduced,
        Stage::ReferredToCommittee,
        Stage::PassedHouse,
        Stage::ReceivedInSenate,
        Stage::PassedSenate,
        Stage::Enacted,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Introduced => "Introduced",
            Stage::ReferredToCommittee => "Referred to Committee",
            Stage::PassedHouse => "Passed House",
            Stage::ReceivedInSenate => "Received in Senate",
            Stage::PassedSenate => "Passed Senate",
            Stage::Enacted => "Enacted",
        }
    }

    pub fn from_index(index: usize) -> Option<Stage> {
        Stage::ALL.get(index).copied()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One row of the decision table. `matches` receives the lowercased status.
pub struct StageRule {
    pub name: &'static str,
    pub stage: Stage,
    pub matches: fn(&str) -> bool,
}

/// Evaluated top to bottom; the first match decides the stage. The order is
/// the tie-break policy, since one action string can mention several stages.
pub static STAGE_RULES: &[StageRule] = &[
    StageRule {
        name: "public_law",
        stage: Stage::Enacted,
        matches: |s| s.contains("became public law"),
    },
    StageRule {
        name: "senate_passage",
        stage: Stage::PassedSenate,
        matches: |s| s.contains("passed senate") || s.contains("agreed to in senate"),
    },
    // Amendment exchange and conference resolution both land here.
    StageRule {
        name: "chamber_message",
        stage: Stage::PassedSenate,
        matches: |s| {
            s.contains("message on") && (s.contains("house action") || s.contains("senate action"))
        },
    },
    StageRule {
        name: "senate_calendar",
        stage: Stage::ReceivedInSenate,
        matches: |s| {
            s.contains("placed on senate legislative calendar")
                || s.contains("placed on general orders calendar")
        },
    },
    StageRule {
        name: "senate_receipt",
        stage: Stage::ReceivedInSenate,
        matches: |s| s.contains("received in the senate"),
    },
    StageRule {
        name: "house_passage",
        stage: Stage::PassedHouse,
        matches: |s| {
            s.contains("passed house")
                || s.contains("on passage passed")
                || (s.contains("agreed to") && !s.contains("senate"))
        },
    },
    StageRule {
        name: "house_floor",
        stage: Stage::PassedHouse,
        matches: |s| {
            s.contains("placed on the union calendar")
                || s.contains("motion to reconsider laid on the table")
                || s.contains("suspension of the rules")
        },
    },
    StageRule {
        name: "committee_referral",
        stage: Stage::ReferredToCommittee,
        matches: |s| s.contains("referred to") || s.contains("subcommittee"),
    },
    StageRule {
        name: "introduction",
        stage: Stage::Introduced,
        matches: |s| s.contains("introduced") || s.contains("sponsor introductory remarks"),
    },
];

/// First rule matching `status`, if any.
pub fn matching_rule(status: Option<&str>) -> Option<&'static StageRule> {
    let lowered = status.unwrap_or_default().to_lowercase();
    STAGE_RULES.iter().find(|rule| (rule.matches)(&lowered))
}

/// Map a free-text latest-action string to a progress stage. Total: absent,
/// empty and unrecognised input all yield `Stage::Introduced`.
pub fn classify(status: Option<&str>) -> Stage {
    matching_rule(status)
        .map(|rule| rule.stage)
        .unwrap_or(Stage::Introduced)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Completed,
    Active,
    Pending,
}

/// Per-stage state for rendering a progress tracker.
pub fn progress_steps(current: Stage) -> Vec<(Stage, StepState)> {
    Stage::ALL
        .iter()
        .map(|&stage| {
            let state = match stage.cmp(&current) {
                std::cmp::Ordering::Less => StepState::Completed,
                std::cmp::Ordering::Equal => StepState::Active,
                std::cmp::Ordering::Greater => StepState::Pending,
            };
            (stage, state)
        })
        .collect()
}
