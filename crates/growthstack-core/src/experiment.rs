use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::GrowthError;

/// Tolerance for variant allocations summing to 100.
const ALLOCATION_SUM_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Completed,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentVariant {
    pub id: String,
    pub name: String,
    /// Percentage of included users routed to this variant.
    pub traffic_allocation: f64,
    pub is_control: bool,
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: String,
    pub hypothesis: String,
    pub status: ExperimentStatus,
    pub target_metric: String,
    pub variants: Vec<ExperimentVariant>,
    /// Percentage of all users included in the experiment at all.
    pub traffic_allocation: f64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Variant fields as supplied at creation time; ids are assigned server-side
/// of the factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSpec {
    pub name: String,
    pub traffic_allocation: f64,
    #[serde(default)]
    pub is_control: bool,
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExperimentRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hypothesis: String,
    pub target_metric: String,
    pub variants: Vec<VariantSpec>,
    /// Defaults to 100 (every user eligible).
    pub traffic_allocation: Option<f64>,
}

fn validate_variants(variants: &[VariantSpec]) -> Result<(), GrowthError> {
    if variants.len() < 2 {
        return Err(GrowthError::TooFewVariants(variants.len()));
    }
    if let Some(bad) = variants
        .iter()
        .find(|v| !(0.0..=100.0).contains(&v.traffic_allocation))
    {
        return Err(GrowthError::AllocationRange(bad.traffic_allocation));
    }
    let sum: f64 = variants.iter().map(|v| v.traffic_allocation).sum();
    if (sum - 100.0).abs() > ALLOCATION_SUM_TOLERANCE {
        return Err(GrowthError::AllocationSum(sum));
    }
    let controls = variants.iter().filter(|v| v.is_control).count();
    if controls != 1 {
        return Err(GrowthError::ControlCount(controls));
    }
    Ok(())
}

impl Experiment {
    /// Factory: validates variant invariants and returns a new experiment
    /// in `draft` status.
    pub fn create(
        req: CreateExperimentRequest,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, GrowthError> {
        validate_variants(&req.variants)?;
        let traffic_allocation = req.traffic_allocation.unwrap_or(100.0);
        if !(0.0..=100.0).contains(&traffic_allocation) {
            return Err(GrowthError::AllocationRange(traffic_allocation));
        }
        let variants = req
            .variants
            .into_iter()
            .map(|spec| ExperimentVariant {
                id: Uuid::new_v4().to_string(),
                name: spec.name,
                traffic_allocation: spec.traffic_allocation,
                is_control: spec.is_control,
                config: spec.config,
            })
            .collect();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            description: req.description,
            hypothesis: req.hypothesis,
            status: ExperimentStatus::Draft,
            target_metric: req.target_metric,
            variants,
            traffic_allocation,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// `draft -> running`. Any other starting state is rejected.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), GrowthError> {
        if self.status != ExperimentStatus::Draft {
            return Err(GrowthError::InvalidTransition {
                id: self.id.clone(),
                expected: ExperimentStatus::Draft.as_str(),
                actual: self.status.as_str(),
            });
        }
        self.status = ExperimentStatus::Running;
        self.updated_at = now;
        Ok(())
    }

    /// `running -> completed`. No reverse transitions.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<(), GrowthError> {
        if self.status != ExperimentStatus::Running {
            return Err(GrowthError::InvalidTransition {
                id: self.id.clone(),
                expected: ExperimentStatus::Running.as_str(),
                actual: self.status.as_str(),
            });
        }
        self.status = ExperimentStatus::Completed;
        self.updated_at = now;
        Ok(())
    }

    pub fn variant(&self, variant_id: &str) -> Option<&ExperimentVariant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }
}

/// A user's sticky bucket for one experiment. At most one per
/// (user, experiment) pair; stable for the experiment's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentAssignment {
    pub user_id: String,
    pub experiment_id: String,
    pub variant_id: String,
    pub assigned_at: DateTime<Utc>,
    pub sticky: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantResult {
    pub variant_id: String,
    pub name: String,
    pub is_control: bool,
    pub participants: i64,
    pub conversions: i64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub experiment_id: String,
    pub status: ExperimentStatus,
    pub target_metric: String,
    pub variants: Vec<VariantResult>,
}
