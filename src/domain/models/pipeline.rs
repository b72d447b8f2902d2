//! The fixed five-phase outreach pipeline definition.
//!
//! The pipeline shape is static: phases, the agents inside each phase, and
//! intra-phase dependencies never change at runtime. The engine consults
//! this definition for readiness, tie-breaking, gates, and compensation
//! ordering.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::run::Phase;

/// Declaration of one agent slot within a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique agent name within the pipeline.
    pub name: String,
    /// Names of agents in the same phase that must complete first.
    pub depends_on: Vec<String>,
    /// Whether this agent declares a compensation hook.
    pub compensable: bool,
    /// Long-running phase-5 agents: failure alerts instead of compensating.
    pub long_running: bool,
}

impl AgentSpec {
    fn new(name: &str, depends_on: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            depends_on: depends_on.iter().map(|s| (*s).to_string()).collect(),
            compensable: true,
            long_running: false,
        }
    }

    fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }
}

/// Declaration of the human gate after a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSpec {
    /// Short description shown to the approver.
    pub description: String,
}

/// One phase of the pipeline: its agents and optional trailing gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub phase: Phase,
    pub agents: Vec<AgentSpec>,
    pub gate: Option<GateSpec>,
}

impl PhaseSpec {
    /// Agents whose dependencies are all in `completed`, excluding agents
    /// already completed or running.
    ///
    /// Tie-break for simultaneous readiness: declaration order (phase
    /// ordinal), then lexicographic name.
    pub fn runnable_agents(&self, completed: &HashSet<String>, active: &HashSet<String>) -> Vec<&AgentSpec> {
        let mut ready: Vec<(usize, &AgentSpec)> = self
            .agents
            .iter()
            .enumerate()
            .filter(|(_, a)| !completed.contains(&a.name) && !active.contains(&a.name))
            .filter(|(_, a)| a.depends_on.iter().all(|d| completed.contains(d)))
            .collect();
        ready.sort_by(|(ia, a), (ib, b)| ia.cmp(ib).then_with(|| a.name.cmp(&b.name)));
        ready.into_iter().map(|(_, a)| a).collect()
    }

    /// The phase's final agent, re-run on `revision_requested`.
    pub fn final_agent(&self) -> Option<&AgentSpec> {
        self.agents.last()
    }

    pub fn agent(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.name == name)
    }
}

/// The complete pipeline: five phases in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub phases: Vec<PhaseSpec>,
}

impl PipelineDefinition {
    /// The fixed outreach pipeline shape.
    pub fn standard() -> Self {
        Self {
            phases: vec![
                PhaseSpec {
                    phase: Phase::MarketIntelligence,
                    agents: vec![
                        AgentSpec::new("niche_research", &[]),
                        AgentSpec::new("persona_research", &["niche_research"]),
                        AgentSpec::new("research_export", &["persona_research"]),
                    ],
                    gate: Some(GateSpec {
                        description: "approve niche & personas".to_string(),
                    }),
                },
                PhaseSpec {
                    phase: Phase::LeadAcquisition,
                    agents: vec![
                        AgentSpec::new("list_builder", &[]),
                        AgentSpec::new("validation", &["list_builder"]),
                        AgentSpec::new("within_dedup", &["validation"]),
                        AgentSpec::new("cross_campaign_dedup", &["within_dedup"]),
                        AgentSpec::new("scoring", &["cross_campaign_dedup"]),
                        AgentSpec::new("import_finalizer", &["scoring"]),
                    ],
                    gate: Some(GateSpec {
                        description: "approve lead list".to_string(),
                    }),
                },
                PhaseSpec {
                    phase: Phase::Verification,
                    agents: vec![
                        AgentSpec::new("email_verification", &[]),
                        AgentSpec::new("enrichment", &[]),
                        AgentSpec::new("verification_finalizer", &["email_verification", "enrichment"]),
                    ],
                    gate: Some(GateSpec {
                        description: "approve for personalization".to_string(),
                    }),
                },
                PhaseSpec {
                    phase: Phase::Personalization,
                    agents: vec![
                        AgentSpec::new("company_research", &[]),
                        AgentSpec::new("lead_research", &[]),
                        AgentSpec::new("email_generation", &["company_research", "lead_research"]),
                        AgentSpec::new("personalization_finalizer", &["email_generation"]),
                    ],
                    gate: Some(GateSpec {
                        description: "approve campaign".to_string(),
                    }),
                },
                PhaseSpec {
                    phase: Phase::Execution,
                    agents: vec![
                        AgentSpec::new("campaign_setup", &[]),
                        AgentSpec::new("sending", &["campaign_setup"]),
                        AgentSpec::new("reply_monitoring", &["sending"]).long_running(),
                        AgentSpec::new("analytics", &["sending"]).long_running(),
                    ],
                    gate: None,
                },
            ],
        }
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseSpec> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// All agent names across the pipeline, in phase/declaration order.
    pub fn agent_names(&self) -> Vec<&str> {
        self.phases
            .iter()
            .flat_map(|p| p.agents.iter().map(|a| a.name.as_str()))
            .collect()
    }

    /// Validate the intra-phase dependency graph: every dependency must
    /// name an earlier agent in the same phase (acyclic by construction).
    pub fn validate(&self) -> Result<(), String> {
        for phase in &self.phases {
            let mut seen: HashSet<&str> = HashSet::new();
            for agent in &phase.agents {
                for dep in &agent.depends_on {
                    if !seen.contains(dep.as_str()) {
                        return Err(format!(
                            "agent {} in {} depends on {} which is not declared earlier in the phase",
                            agent.name, phase.phase, dep
                        ));
                    }
                }
                if !seen.insert(agent.name.as_str()) {
                    return Err(format!("duplicate agent name {} in {}", agent.name, phase.phase));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_pipeline_is_valid() {
        let pipeline = PipelineDefinition::standard();
        assert!(pipeline.validate().is_ok());
        assert_eq!(pipeline.phases.len(), 5);
    }

    #[test]
    fn test_phase_gates() {
        let pipeline = PipelineDefinition::standard();
        for phase in [
            Phase::MarketIntelligence,
            Phase::LeadAcquisition,
            Phase::Verification,
            Phase::Personalization,
        ] {
            assert!(pipeline.phase(phase).unwrap().gate.is_some(), "{phase} should gate");
        }
        assert!(pipeline.phase(Phase::Execution).unwrap().gate.is_none());
    }

    #[test]
    fn test_runnable_respects_dependencies() {
        let pipeline = PipelineDefinition::standard();
        let phase1 = pipeline.phase(Phase::MarketIntelligence).unwrap();

        let none = HashSet::new();
        let ready = phase1.runnable_agents(&none, &none);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].name, "niche_research");

        let completed: HashSet<String> = ["niche_research".to_string()].into();
        let ready = phase1.runnable_agents(&completed, &none);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].name, "persona_research");
    }

    #[test]
    fn test_parallel_agents_ready_together() {
        let pipeline = PipelineDefinition::standard();
        let phase3 = pipeline.phase(Phase::Verification).unwrap();

        let none = HashSet::new();
        let ready = phase3.runnable_agents(&none, &none);
        let names: Vec<&str> = ready.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["email_verification", "enrichment"]);
    }

    #[test]
    fn test_running_agents_excluded() {
        let pipeline = PipelineDefinition::standard();
        let phase3 = pipeline.phase(Phase::Verification).unwrap();

        let completed = HashSet::new();
        let active: HashSet<String> = ["email_verification".to_string()].into();
        let ready = phase3.runnable_agents(&completed, &active);
        let names: Vec<&str> = ready.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["enrichment"]);
    }

    #[test]
    fn test_long_running_agents_marked() {
        let pipeline = PipelineDefinition::standard();
        let phase5 = pipeline.phase(Phase::Execution).unwrap();
        assert!(phase5.agent("reply_monitoring").unwrap().long_running);
        assert!(phase5.agent("analytics").unwrap().long_running);
        assert!(!phase5.agent("sending").unwrap().long_running);
    }

    #[test]
    fn test_final_agents() {
        let pipeline = PipelineDefinition::standard();
        assert_eq!(
            pipeline.phase(Phase::MarketIntelligence).unwrap().final_agent().unwrap().name,
            "research_export"
        );
        assert_eq!(
            pipeline.phase(Phase::LeadAcquisition).unwrap().final_agent().unwrap().name,
            "import_finalizer"
        );
    }

    #[test]
    fn test_invalid_dependency_rejected() {
        let mut pipeline = PipelineDefinition::standard();
        pipeline.phases[0].agents[0].depends_on.push("nonexistent".to_string());
        assert!(pipeline.validate().is_err());
    }
}
