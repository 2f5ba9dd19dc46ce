use crate::basis::SpectralIndexing;
use crate::equilibrium::{AxisInput, BoundaryInput, ProfileInput};
use crate::error::{EquilibriumError, Result};
use crate::grid::NodePattern;
use crate::objective::ObjectiveKind;
use crate::optimize::{OptimizerMethod, SolverOptions};
use log::warn;
use num::rational::Ratio;

/// A per-stage setting: one value for every stage, or an explicit list with
/// the last entry carried forward when the list is shorter than the stage
/// count.
#[derive(Debug, Clone)]
pub enum PerStage<T: Clone> {
    Scalar(T),
    List(Vec<T>),
}

impl<T: Clone> PerStage<T> {
    pub fn len(&self) -> usize {
        match self {
            PerStage::Scalar(_) => return 1,
            PerStage::List(values) => return values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    pub fn get(&self, stage: usize) -> T {
        match self {
            PerStage::Scalar(value) => return value.clone(),
            PerStage::List(values) => return values[stage.min(values.len() - 1)].clone(),
        }
    }
}

impl<T: Clone> From<T> for PerStage<T> {
    fn from(value: T) -> PerStage<T> {
        return PerStage::Scalar(value);
    }
}

impl<T: Clone> From<Vec<T>> for PerStage<T> {
    fn from(values: Vec<T>) -> PerStage<T> {
        return PerStage::List(values);
    }
}

/// The complete, typed description of a continuation run: global physics
/// parameters, the raw profile / boundary / axis coefficient tables, and the
/// per-stage numerical settings.
#[derive(Debug, Clone)]
pub struct InputConfig {
    pub sym: bool,
    /// field periods; rational values cover split-period configurations
    pub nfp: Ratio<i64>,
    pub psi: f64,
    pub indexing: SpectralIndexing,
    pub node_pattern: NodePattern,
    pub objective: ObjectiveKind,
    pub optimizer: OptimizerMethod,

    pub l_res: PerStage<usize>,
    pub m_res: PerStage<usize>,
    pub n_res: PerStage<usize>,
    pub m_grid: PerStage<usize>,
    pub n_grid: PerStage<usize>,
    pub bdry_ratio: PerStage<f64>,
    pub pres_ratio: PerStage<f64>,
    pub pert_order: PerStage<usize>,
    pub ftol: PerStage<f64>,
    pub xtol: PerStage<f64>,
    pub gtol: PerStage<f64>,
    pub nfev: PerStage<usize>,

    pub profiles: Vec<ProfileInput>,
    pub boundary: Vec<BoundaryInput>,
    pub axis: Vec<AxisInput>,
}

impl Default for InputConfig {
    fn default() -> InputConfig {
        return InputConfig {
            sym: false,
            nfp: Ratio::from_integer(1),
            psi: 1.0,
            indexing: SpectralIndexing::Ansi,
            node_pattern: NodePattern::Jacobi,
            objective: ObjectiveKind::ForceBalance,
            optimizer: OptimizerMethod::Dogleg,
            l_res: PerStage::Scalar(0),
            m_res: PerStage::Scalar(0),
            n_res: PerStage::Scalar(0),
            m_grid: PerStage::Scalar(0),
            n_grid: PerStage::Scalar(0),
            bdry_ratio: PerStage::Scalar(1.0),
            pres_ratio: PerStage::Scalar(1.0),
            pert_order: PerStage::Scalar(1),
            ftol: PerStage::Scalar(1e-6),
            xtol: PerStage::Scalar(1e-6),
            gtol: PerStage::Scalar(1e-6),
            nfev: PerStage::Scalar(100),
            profiles: Vec::new(),
            boundary: Vec::new(),
            axis: Vec::new(),
        };
    }
}

/// One fully resolved continuation stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub l_res: usize,
    pub m_res: usize,
    pub n_res: usize,
    pub m_grid: usize,
    pub n_grid: usize,
    pub bdry_ratio: f64,
    pub pres_ratio: f64,
    pub pert_order: usize,
    pub objective: ObjectiveKind,
    pub node_pattern: NodePattern,
    pub solver: SolverOptions,
}

impl InputConfig {
    /// Parse the line-oriented input text: `key = value` settings (values may
    /// be comma-separated per-stage lists, `a x b` repetitions or
    /// `start:step:stop` ranges), `l:` profile rows, `m:`/`n:` boundary rows,
    /// `n:` axis rows. `#` starts a comment, a leading `!` disables a line.
    pub fn parse(text: &str) -> Result<InputConfig> {
        let mut config: InputConfig = InputConfig::default();
        let mut saw_l_rad: bool = false;
        let mut saw_m_grid: bool = false;
        let mut saw_n_grid: bool = false;

        for (lineno, raw) in text.lines().enumerate() {
            let line: &str = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            let line: &str = line.trim();
            if line.is_empty() || line.starts_with('!') {
                continue;
            }

            // coefficient table rows carry a leading index marker
            let lower: String = line.to_ascii_lowercase();
            if lower.starts_with("l:") {
                parse_profile_row(line, lineno, &mut config.profiles)?;
                continue;
            }
            if lower.starts_with("m:") {
                parse_boundary_row(line, lineno, &mut config.boundary)?;
                continue;
            }
            if lower.starts_with("n:") {
                parse_axis_row(line, lineno, &mut config.axis)?;
                continue;
            }

            let (key, value): (&str, &str) = line
                .split_once('=')
                .ok_or_else(|| invalid(lineno, line, "expected `key = value`"))?;
            let key: String = key.trim().to_ascii_lowercase();
            let value: &str = value.trim();
            match key.as_str() {
                "sym" => config.sym = parse_number(value, lineno)? != 0.0,
                "nfp" => config.nfp = parse_rational(value, lineno)?,
                "psi" => config.psi = parse_number(value, lineno)?,
                "l_rad" => {
                    config.l_res = per_stage_usize(value, lineno)?;
                    saw_l_rad = true;
                }
                "m_pol" => config.m_res = per_stage_usize(value, lineno)?,
                "n_tor" => config.n_res = per_stage_usize(value, lineno)?,
                "m_grid" => {
                    config.m_grid = per_stage_usize(value, lineno)?;
                    saw_m_grid = true;
                }
                "n_grid" => {
                    config.n_grid = per_stage_usize(value, lineno)?;
                    saw_n_grid = true;
                }
                "bdry_ratio" => config.bdry_ratio = per_stage_f64(value, lineno)?,
                "pres_ratio" => config.pres_ratio = per_stage_f64(value, lineno)?,
                "pert_order" => config.pert_order = per_stage_usize(value, lineno)?,
                "ftol" => config.ftol = per_stage_f64(value, lineno)?,
                "xtol" => config.xtol = per_stage_f64(value, lineno)?,
                "gtol" => config.gtol = per_stage_f64(value, lineno)?,
                "nfev" => config.nfev = per_stage_usize(value, lineno)?,
                "objective" => {
                    config.objective = match value.to_ascii_lowercase().as_str() {
                        "force" => ObjectiveKind::ForceBalance,
                        "energy" => ObjectiveKind::Energy,
                        other => return Err(invalid(lineno, other, "unknown objective")),
                    };
                }
                "optimizer" => {
                    config.optimizer = match value.to_ascii_lowercase().as_str() {
                        "dogleg" => OptimizerMethod::Dogleg,
                        "lm" | "levenberg" | "lsq-exact" => OptimizerMethod::LevenbergMarquardt,
                        other => return Err(invalid(lineno, other, "unknown optimizer")),
                    };
                }
                "spectral_indexing" => {
                    config.indexing = match value.to_ascii_lowercase().as_str() {
                        "ansi" => SpectralIndexing::Ansi,
                        "fringe" => SpectralIndexing::Fringe,
                        "chevron" => SpectralIndexing::Chevron,
                        other => return Err(invalid(lineno, other, "unknown spectral indexing")),
                    };
                }
                "node_pattern" => {
                    config.node_pattern = match value.to_ascii_lowercase().as_str() {
                        "uniform" => NodePattern::Uniform,
                        "quad" => NodePattern::Quad,
                        "jacobi" => NodePattern::Jacobi,
                        other => return Err(invalid(lineno, other, "unknown node pattern")),
                    };
                }
                _ => warn!("ignoring unrecognised input key `{}`", key),
            }
        }

        // unspecified resolutions follow the poloidal resolution: the radial
        // degree matches the pyramid (doubled for fringe), the grid oversamples
        // the basis twofold
        if !saw_l_rad {
            let factor: usize = if config.indexing == SpectralIndexing::Fringe { 2 } else { 1 };
            config.l_res = scale_per_stage(&config.m_res, factor);
        }
        if !saw_m_grid {
            config.m_grid = scale_per_stage(&config.m_res, 2);
        }
        if !saw_n_grid {
            config.n_grid = scale_per_stage(&config.n_res, 2);
        }
        return Ok(config);
    }

    pub fn nfp_value(&self) -> f64 {
        return *self.nfp.numer() as f64 / *self.nfp.denom() as f64;
    }

    /// Number of stages: the longest per-stage list wins.
    pub fn num_stages(&self) -> usize {
        let lengths: [usize; 12] = [
            self.l_res.len(),
            self.m_res.len(),
            self.n_res.len(),
            self.m_grid.len(),
            self.n_grid.len(),
            self.bdry_ratio.len(),
            self.pres_ratio.len(),
            self.pert_order.len(),
            self.ftol.len(),
            self.xtol.len(),
            self.gtol.len(),
            self.nfev.len(),
        ];
        return lengths.into_iter().max().unwrap_or(1).max(1);
    }

    /// Broadcast the per-stage settings into an explicit stage list, checking
    /// every consistency rule before any solve is attempted.
    pub fn expand_stages(&self) -> Result<Vec<StageConfig>> {
        if self.boundary.is_empty() {
            return Err(EquilibriumError::InvalidResolution(
                "at least one boundary coefficient is required".to_string(),
            ));
        }
        if self.psi == 0.0 {
            return Err(EquilibriumError::InvalidResolution(
                "total toroidal flux must be non-zero".to_string(),
            ));
        }
        if !(self.nfp_value() > 0.0) {
            return Err(EquilibriumError::InvalidResolution(format!(
                "number of field periods must be positive, got {}",
                self.nfp
            )));
        }
        if self.l_res.is_empty()
            || self.m_res.is_empty()
            || self.n_res.is_empty()
            || self.m_grid.is_empty()
            || self.n_grid.is_empty()
            || self.bdry_ratio.is_empty()
            || self.pres_ratio.is_empty()
            || self.pert_order.is_empty()
            || self.ftol.is_empty()
            || self.xtol.is_empty()
            || self.gtol.is_empty()
            || self.nfev.is_empty()
        {
            return Err(EquilibriumError::InvalidResolution(
                "per-stage setting lists must not be empty".to_string(),
            ));
        }

        let mut stages: Vec<StageConfig> = Vec::new();
        for i in 0..self.num_stages() {
            let l_res: usize = self.l_res.get(i);
            let m_res: usize = self.m_res.get(i);
            let n_res: usize = self.n_res.get(i);
            let m_grid: usize = self.m_grid.get(i);
            let n_grid: usize = self.n_grid.get(i);
            let nfev: usize = self.nfev.get(i);

            if m_res < 1 {
                return Err(EquilibriumError::InvalidResolution(format!(
                    "stage {}: poloidal resolution must be at least 1",
                    i
                )));
            }
            if self.indexing == SpectralIndexing::Ansi && l_res < m_res {
                return Err(EquilibriumError::InvalidResolution(format!(
                    "stage {}: ANSI indexing requires L >= M, got L={} < M={}",
                    i, l_res, m_res
                )));
            }
            if m_grid < m_res || n_grid < n_res {
                return Err(EquilibriumError::InvalidResolution(format!(
                    "stage {}: grid resolution ({}, {}) cannot resolve basis resolution ({}, {})",
                    i, m_grid, n_grid, m_res, n_res
                )));
            }
            if nfev < 1 {
                return Err(EquilibriumError::InvalidResolution(format!(
                    "stage {}: the evaluation budget must be at least 1",
                    i
                )));
            }

            stages.push(StageConfig {
                l_res,
                m_res,
                n_res,
                m_grid,
                n_grid,
                bdry_ratio: self.bdry_ratio.get(i),
                pres_ratio: self.pres_ratio.get(i),
                pert_order: self.pert_order.get(i),
                objective: self.objective,
                node_pattern: self.node_pattern,
                solver: SolverOptions {
                    ftol: self.ftol.get(i),
                    xtol: self.xtol.get(i),
                    gtol: self.gtol.get(i),
                    max_nfev: nfev,
                    method: self.optimizer,
                    ..SolverOptions::default()
                },
            });
        }
        return Ok(stages);
    }
}

fn invalid(lineno: usize, fragment: &str, message: &str) -> EquilibriumError {
    return EquilibriumError::InvalidInput(format!("line {}: {} (`{}`)", lineno + 1, message, fragment));
}

fn parse_number(value: &str, lineno: usize) -> Result<f64> {
    return value.parse::<f64>().map_err(|_| invalid(lineno, value, "expected a number"));
}

/// Integer or rational `p/q` number of field periods.
fn parse_rational(value: &str, lineno: usize) -> Result<Ratio<i64>> {
    match value.split_once('/') {
        Some((p, q)) => {
            let numer: i64 = p.trim().parse::<i64>().map_err(|_| invalid(lineno, value, "expected an integer numerator"))?;
            let denom: i64 = q.trim().parse::<i64>().map_err(|_| invalid(lineno, value, "expected an integer denominator"))?;
            if denom == 0 {
                return Err(invalid(lineno, value, "zero denominator"));
            }
            return Ok(Ratio::new(numer, denom));
        }
        None => {
            let whole: i64 = value.parse::<i64>().map_err(|_| invalid(lineno, value, "expected an integer or `p/q`"))?;
            return Ok(Ratio::from_integer(whole));
        }
    }
}

/// Comma-separated values, each either a plain number, a repetition `a x b`
/// or an inclusive range `start:step:stop`.
fn parse_f64_list(value: &str, lineno: usize) -> Result<Vec<f64>> {
    let mut out: Vec<f64> = Vec::new();
    for item in value.split(',') {
        let item: &str = item.trim();
        if item.is_empty() {
            continue;
        }
        if let Some((v, count)) = item.split_once(['x', 'X']) {
            let v: f64 = parse_number(v.trim(), lineno)?;
            let count: usize = count
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid(lineno, item, "expected `value x count`"))?;
            out.extend(std::iter::repeat(v).take(count));
            continue;
        }
        if item.contains(':') {
            let parts: Vec<&str> = item.split(':').collect();
            if parts.len() != 3 {
                return Err(invalid(lineno, item, "expected `start:step:stop`"));
            }
            let start: f64 = parse_number(parts[0].trim(), lineno)?;
            let step: f64 = parse_number(parts[1].trim(), lineno)?;
            let stop: f64 = parse_number(parts[2].trim(), lineno)?;
            if step == 0.0 {
                return Err(invalid(lineno, item, "zero range step"));
            }
            let eps: f64 = 1e-9 * step.abs();
            let mut v: f64 = start;
            while (step > 0.0 && v <= stop + eps) || (step < 0.0 && v >= stop - eps) {
                out.push(v);
                v += step;
            }
            continue;
        }
        out.push(parse_number(item, lineno)?);
    }
    return Ok(out);
}

fn parse_usize_list(value: &str, lineno: usize) -> Result<Vec<usize>> {
    let raw: Vec<f64> = parse_f64_list(value, lineno)?;
    let mut out: Vec<usize> = Vec::with_capacity(raw.len());
    for v in raw {
        if v < 0.0 || v.fract() != 0.0 {
            return Err(invalid(lineno, value, "expected non-negative integers"));
        }
        out.push(v as usize);
    }
    return Ok(out);
}

fn per_stage_f64(value: &str, lineno: usize) -> Result<PerStage<f64>> {
    let values: Vec<f64> = parse_f64_list(value, lineno)?;
    match values.len() {
        0 => return Err(invalid(lineno, value, "empty value list")),
        1 => return Ok(PerStage::Scalar(values[0])),
        _ => return Ok(PerStage::List(values)),
    }
}

fn per_stage_usize(value: &str, lineno: usize) -> Result<PerStage<usize>> {
    let values: Vec<usize> = parse_usize_list(value, lineno)?;
    match values.len() {
        0 => return Err(invalid(lineno, value, "empty value list")),
        1 => return Ok(PerStage::Scalar(values[0])),
        _ => return Ok(PerStage::List(values)),
    }
}

fn scale_per_stage(values: &PerStage<usize>, factor: usize) -> PerStage<usize> {
    match values {
        PerStage::Scalar(v) => return PerStage::Scalar(v * factor),
        PerStage::List(list) => return PerStage::List(list.iter().map(|&v: &usize| v * factor).collect()),
    }
}

/// Key/value pairs of an index-marked row, with `:` and `=` treated as
/// separators: `m: 1 n: 0 R1 = 1.0` becomes `[(m, 1), (n, 0), (r1, 1.0)]`.
fn key_value_tokens(line: &str, lineno: usize) -> Result<Vec<(String, String)>> {
    let cleaned: String = line.replace([':', '='], " ");
    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    if tokens.len() % 2 != 0 {
        return Err(invalid(lineno, line, "expected `key value` pairs"));
    }
    let mut pairs: Vec<(String, String)> = Vec::new();
    for pair in tokens.chunks(2) {
        pairs.push((pair[0].to_ascii_lowercase(), pair[1].to_string()));
    }
    return Ok(pairs);
}

fn parse_index(value: &str, lineno: usize) -> Result<i32> {
    return value.parse::<i32>().map_err(|_| invalid(lineno, value, "expected an integer index"));
}

/// `l: <deg> p = <val> i = <val>`; repeated degrees merge.
fn parse_profile_row(line: &str, lineno: usize, rows: &mut Vec<ProfileInput>) -> Result<()> {
    let mut l: Option<i32> = None;
    let mut pressure: Option<f64> = None;
    let mut iota: Option<f64> = None;
    for (key, value) in key_value_tokens(line, lineno)? {
        match key.as_str() {
            "l" => l = Some(parse_index(&value, lineno)?),
            "p" => pressure = Some(parse_number(&value, lineno)?),
            "i" => iota = Some(parse_number(&value, lineno)?),
            _ => return Err(invalid(lineno, &key, "unknown profile column")),
        }
    }
    let l: i32 = l.ok_or_else(|| invalid(lineno, line, "profile row without a degree"))?;
    let index: usize = match rows.iter().position(|r: &ProfileInput| r.l == l) {
        Some(index) => index,
        None => {
            rows.push(ProfileInput { l, pressure: 0.0, iota: 0.0 });
            rows.len() - 1
        }
    };
    if let Some(p) = pressure {
        rows[index].pressure = p;
    }
    if let Some(i) = iota {
        rows[index].iota = i;
    }
    return Ok(());
}

/// `m: <m> n: <n> R1 = <val> Z1 = <val>`; rows sharing (m, n) merge.
fn parse_boundary_row(line: &str, lineno: usize, rows: &mut Vec<BoundaryInput>) -> Result<()> {
    let mut m: Option<i32> = None;
    let mut n: Option<i32> = None;
    let mut r: Option<f64> = None;
    let mut z: Option<f64> = None;
    for (key, value) in key_value_tokens(line, lineno)? {
        match key.as_str() {
            "m" => m = Some(parse_index(&value, lineno)?),
            "n" => n = Some(parse_index(&value, lineno)?),
            "r1" => r = Some(parse_number(&value, lineno)?),
            "z1" => z = Some(parse_number(&value, lineno)?),
            _ => return Err(invalid(lineno, &key, "unknown boundary column")),
        }
    }
    let m: i32 = m.ok_or_else(|| invalid(lineno, line, "boundary row without m"))?;
    let n: i32 = n.unwrap_or(0);
    let index: usize = match rows.iter().position(|b: &BoundaryInput| b.m == m && b.n == n) {
        Some(index) => index,
        None => {
            rows.push(BoundaryInput { m, n, r: 0.0, z: 0.0 });
            rows.len() - 1
        }
    };
    if let Some(v) = r {
        rows[index].r = v;
    }
    if let Some(v) = z {
        rows[index].z = v;
    }
    return Ok(());
}

/// `n: <mode> R0 = <val> Z0 = <val>`; rows sharing n merge.
fn parse_axis_row(line: &str, lineno: usize, rows: &mut Vec<AxisInput>) -> Result<()> {
    let mut n: Option<i32> = None;
    let mut r: Option<f64> = None;
    let mut z: Option<f64> = None;
    for (key, value) in key_value_tokens(line, lineno)? {
        match key.as_str() {
            "n" => n = Some(parse_index(&value, lineno)?),
            "r0" => r = Some(parse_number(&value, lineno)?),
            "z0" => z = Some(parse_number(&value, lineno)?),
            _ => return Err(invalid(lineno, &key, "unknown axis column")),
        }
    }
    let n: i32 = n.ok_or_else(|| invalid(lineno, line, "axis row without n"))?;
    let index: usize = match rows.iter().position(|a: &AxisInput| a.n == n) {
        Some(index) => index,
        None => {
            rows.push(AxisInput { n, r: 0.0, z: 0.0 });
            rows.len() - 1
        }
    };
    if let Some(v) = r {
        rows[index].r = v;
    }
    if let Some(v) = z {
        rows[index].z = v;
    }
    return Ok(());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> InputConfig {
        return InputConfig {
            m_res: PerStage::Scalar(2),
            l_res: PerStage::Scalar(2),
            m_grid: PerStage::Scalar(3),
            boundary: vec![
                BoundaryInput { m: 0, n: 0, r: 10.0, z: 0.0 },
                BoundaryInput { m: 1, n: 0, r: 1.0, z: 0.0 },
                BoundaryInput { m: -1, n: 0, r: 0.0, z: 1.0 },
            ],
            profiles: vec![ProfileInput { l: 0, pressure: 0.0, iota: 1.0 }],
            ..InputConfig::default()
        };
    }

    #[test]
    fn test_scalar_settings_broadcast_and_lists_carry_forward() {
        let mut config: InputConfig = base_config();
        config.m_res = PerStage::List(vec![2, 4, 6]);
        config.l_res = PerStage::List(vec![2, 4, 6]);
        config.m_grid = PerStage::List(vec![3, 5, 8]);
        config.pres_ratio = PerStage::List(vec![0.0, 0.5]);

        let stages: Vec<StageConfig> = config.expand_stages().unwrap();
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[2].m_res, 6);
        // shorter lists repeat their last entry
        assert_eq!(stages[2].pres_ratio, 0.5);
        // scalars broadcast
        assert_eq!(stages[0].bdry_ratio, 1.0);
        assert_eq!(stages[2].bdry_ratio, 1.0);
    }

    #[test]
    fn test_ansi_resolution_rule_is_checked_per_stage() {
        let mut config: InputConfig = base_config();
        config.m_res = PerStage::List(vec![2, 6]);
        config.l_res = PerStage::List(vec![2, 4]);
        config.m_grid = PerStage::Scalar(8);
        let result: Result<Vec<StageConfig>> = config.expand_stages();
        assert!(matches!(result, Err(EquilibriumError::InvalidResolution(_))));
    }

    #[test]
    fn test_grid_must_resolve_the_basis() {
        let mut config: InputConfig = base_config();
        config.m_grid = PerStage::Scalar(1);
        let result: Result<Vec<StageConfig>> = config.expand_stages();
        assert!(matches!(result, Err(EquilibriumError::InvalidResolution(_))));
    }

    #[test]
    fn test_boundary_and_flux_are_mandatory() {
        let mut config: InputConfig = base_config();
        config.boundary.clear();
        assert!(config.expand_stages().is_err());

        let mut config: InputConfig = base_config();
        config.psi = 0.0;
        assert!(config.expand_stages().is_err());
    }

    #[test]
    fn test_rational_field_periods() {
        use approx::assert_abs_diff_eq;

        let mut config: InputConfig = base_config();
        config.nfp = Ratio::new(5, 2);
        assert_abs_diff_eq!(config.nfp_value(), 2.5, epsilon = 1e-15);
    }

    #[test]
    fn test_parse_full_input_text() {
        use approx::assert_abs_diff_eq;

        let text: &str = "\
# axisymmetric test case
sym = 1
NFP = 1
Psi = 1.0

L_rad = 6
M_pol = 6
N_tor = 0
M_grid = 6
N_grid = 0

ftol = 1e-10
xtol = 1e-10
gtol = 1e-10
nfev = 100
objective = force
optimizer = dogleg
spectral_indexing = ansi
node_pattern = jacobi

l: 0  p =  1.25E-1  i = 1.0
l: 2  p = -1.25E-1  i = 0.0

n: 0  R0 = 4.0  Z0 = 0.0

m:  0  n: 0  R1 =  3.999  Z1 = 0.0
m:  1  n: 0  R1 =  1.026
m: -1  n: 0  Z1 =  1.58   # sine harmonic
!m: 3  n: 0  R1 = 9.9
";
        let config: InputConfig = InputConfig::parse(text).unwrap();
        assert!(config.sym);
        assert_abs_diff_eq!(config.nfp_value(), 1.0, epsilon = 1e-15);
        assert_eq!(config.l_res.get(0), 6);
        assert_eq!(config.nfev.get(0), 100);
        assert_eq!(config.node_pattern, NodePattern::Jacobi);

        assert_eq!(config.profiles.len(), 2);
        assert_abs_diff_eq!(config.profiles[0].pressure, 0.125, epsilon = 1e-15);
        assert_abs_diff_eq!(config.profiles[1].pressure, -0.125, epsilon = 1e-15);

        assert_eq!(config.axis.len(), 1);
        assert_abs_diff_eq!(config.axis[0].r, 4.0, epsilon = 1e-15);

        // the disabled row is skipped, the comment stripped
        assert_eq!(config.boundary.len(), 3);
        assert_abs_diff_eq!(config.boundary[2].z, 1.58, epsilon = 1e-15);

        // the parsed configuration is solvable as-is
        assert!(config.expand_stages().is_ok());
    }

    #[test]
    fn test_parse_repetitions_and_ranges() {
        use approx::assert_abs_diff_eq;

        let values: Vec<f64> = parse_f64_list("0.0 x 2, 0.5:0.25:1.0", 0).unwrap();
        assert_eq!(values.len(), 5);
        assert_abs_diff_eq!(values[0], 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(values[1], 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(values[2], 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(values[3], 0.75, epsilon = 1e-15);
        assert_abs_diff_eq!(values[4], 1.0, epsilon = 1e-15);

        let stages: Vec<usize> = parse_usize_list("2:2:8", 0).unwrap();
        assert_eq!(stages, vec![2, 4, 6, 8]);
    }

    #[test]
    fn test_parse_rational_nfp_and_defaults() {
        use approx::assert_abs_diff_eq;

        let config: InputConfig = InputConfig::parse("NFP = 19/3\nM_pol = 4\nm: 0 n: 0 R1 = 10.0").unwrap();
        assert_abs_diff_eq!(config.nfp_value(), 19.0 / 3.0, epsilon = 1e-14);
        // unspecified radial and grid resolutions follow the poloidal one
        assert_eq!(config.l_res.get(0), 4);
        assert_eq!(config.m_grid.get(0), 8);

        let fringe: InputConfig = InputConfig::parse("spectral_indexing = fringe\nM_pol = 4\nm: 0 n: 0 R1 = 10.0").unwrap();
        assert_eq!(fringe.l_res.get(0), 8);
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(matches!(InputConfig::parse("ftol 1e-6"), Err(EquilibriumError::InvalidInput(_))));
        assert!(matches!(InputConfig::parse("nfev = soon"), Err(EquilibriumError::InvalidInput(_))));
        assert!(matches!(InputConfig::parse("M_pol = 2.5"), Err(EquilibriumError::InvalidInput(_))));
        assert!(matches!(InputConfig::parse("objective = vibes"), Err(EquilibriumError::InvalidInput(_))));
        assert!(matches!(InputConfig::parse("l: 0 q = 1.0"), Err(EquilibriumError::InvalidInput(_))));
    }
}
