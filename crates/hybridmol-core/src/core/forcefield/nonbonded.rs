use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Declared nonbonded functional forms of a model.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NonbondedInfo {
    pub vdw_funct: String,
    pub vdw_rule: String,
    pub es_funct: String,
}

impl NonbondedInfo {
    pub fn new(vdw_funct: &str, vdw_rule: &str) -> Self {
        Self {
            vdw_funct: vdw_funct.to_string(),
            vdw_rule: vdw_rule.to_string(),
            es_funct: String::new(),
        }
    }

    /// Resolves the declared function and combining rule.
    pub fn vdw_model(&self) -> Result<VdwModel, NonbondedError> {
        let funct = self.vdw_funct.parse::<VdwFunction>()?;
        let rule = funct.rule(&self.vdw_rule)?;
        Ok(VdwModel { funct, rule })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NonbondedError {
    #[error("Unsupported van der Waals function '{0}'")]
    UnsupportedVdwFunction(String),
    #[error("Unsupported combining rule '{rule}' for {funct}")]
    UnsupportedCombiningRule { funct: String, rule: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VdwFunction {
    Lj12_6,
    Exp6,
}

impl FromStr for VdwFunction {
    type Err = NonbondedError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vdw_12_6" => Ok(VdwFunction::Lj12_6),
            "vdw_exp_6" => Ok(VdwFunction::Exp6),
            _ => Err(NonbondedError::UnsupportedVdwFunction(s.to_string())),
        }
    }
}

impl fmt::Display for VdwFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                VdwFunction::Lj12_6 => "vdw_12_6",
                VdwFunction::Exp6 => "vdw_exp_6",
            }
        )
    }
}

impl VdwFunction {
    /// Per-atom columns of the `nonbonded` table, in the order `combine` expects.
    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            VdwFunction::Lj12_6 => &["sigma", "epsilon"],
            VdwFunction::Exp6 => &["alpha", "epsilon", "rmin"],
        }
    }

    /// Name of the explicit pair table carrying this function's coefficients.
    pub fn pair_table(&self) -> &'static str {
        match self {
            VdwFunction::Lj12_6 => "pair_12_6_es",
            VdwFunction::Exp6 => "pair_exp_6_es",
        }
    }

    fn rule(&self, rule: &str) -> Result<CombiningRule, NonbondedError> {
        match (self, rule) {
            (VdwFunction::Lj12_6, "geometric") => Ok(CombiningRule::Geometric),
            (VdwFunction::Lj12_6, "arithmetic/geometric") => Ok(CombiningRule::ArithmeticGeometric),
            (VdwFunction::Exp6, "lb/geometric") => Ok(CombiningRule::LbGeometric),
            _ => Err(NonbondedError::UnsupportedCombiningRule {
                funct: self.to_string(),
                rule: rule.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombiningRule {
    Geometric,
    ArithmeticGeometric,
    LbGeometric,
}

/// A validated (function, rule) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VdwModel {
    pub funct: VdwFunction,
    pub rule: CombiningRule,
}

/// Explicit pair coefficients; `cij` is only present for `vdw_exp_6`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairCoefficients {
    pub aij: f64,
    pub bij: f64,
    pub cij: Option<f64>,
}

impl PairCoefficients {
    /// Column assignments for the pair table, with `qij` as the Coulomb term.
    pub fn columns(&self, qij: f64) -> Vec<(&'static str, f64)> {
        let mut columns = vec![("aij", self.aij), ("bij", self.bij)];
        if let Some(cij) = self.cij {
            columns.push(("cij", cij));
        }
        columns.push(("qij", qij));
        columns
    }
}

impl VdwModel {
    /// Combines two atoms' per-atom parameters, given in `param_names()` order.
    pub fn combine(&self, vi: &[f64], vj: &[f64]) -> PairCoefficients {
        match self.rule {
            CombiningRule::Geometric => {
                let sij = (vi[0] * vj[0]).sqrt();
                let eij = (vi[1] * vj[1]).sqrt();
                sigma_epsilon_to_ab(sij, eij)
            }
            CombiningRule::ArithmeticGeometric => {
                let sij = 0.5 * (vi[0] + vj[0]);
                let eij = (vi[1] * vj[1]).sqrt();
                sigma_epsilon_to_ab(sij, eij)
            }
            CombiningRule::LbGeometric => {
                let (ai, bi, ci) = exp6_abc(vi);
                let (aj, bj, cj) = exp6_abc(vj);
                PairCoefficients {
                    aij: (ai * aj).sqrt(),
                    bij: 0.5 * (bi + bj),
                    cij: Some((ci * cj).sqrt()),
                }
            }
        }
    }
}

fn sigma_epsilon_to_ab(sij: f64, eij: f64) -> PairCoefficients {
    PairCoefficients {
        aij: 4.0 * eij * sij.powi(12),
        bij: 4.0 * eij * sij.powi(6),
        cij: None,
    }
}

/// (alpha, epsilon, rmin) to (A, B, C); alpha == 0 marks values already in A, B form.
fn exp6_abc(v: &[f64]) -> (f64, f64, f64) {
    let (alpha, epsilon, rmin) = (v[0], v[1], v[2]);
    if alpha == 0.0 {
        (alpha, epsilon, 0.0)
    } else {
        (
            6.0 * epsilon * alpha.exp() / (alpha - 6.0),
            rmin / alpha,
            alpha.powi(7) * epsilon / (alpha - 6.0),
        )
    }
}
