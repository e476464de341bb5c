//! Fission driver.
//!
//! Runs classify, counter discovery, dependence analysis, bound extraction,
//! splitting and wiring over every candidate function of a module. Each
//! function is transformed on a scratch copy; only a clone that made it
//! through every stage and verifies is committed back into the module.

use log::{debug, info, warn};
use serde::Serialize;

use crate::analysis::kernel::{kernel_for_stub, AnnotationOracle, KernelOracle};
use crate::analysis::region::{NoRegionOracle, RegionOracle};
use crate::analysis::{
    analyze_loops, extract_bounds, AccessPathSummary, Conflict, DependenceAnalysis, DependenceResult,
    InductionFinder, InductionVariable, Loop,
};
use crate::codegen::format_instruction;
use crate::ir::{verify_function, Function, Module, Value};
use crate::transform::fission::{fissioned_name, wire_fission};
use crate::transform::split::split_loop;
use crate::utils::errors::{FissionError, FissionErrorKind};

/// Fission pipeline configuration.
#[derive(Debug, Clone)]
pub struct FissionConfig {
    /// Accept a self-incrementing header phi that no compare uses
    pub allow_uncompared_counter: bool,
    /// Annotate the clone of a kernel as a kernel
    pub annotate_clones: bool,
    /// Only consider functions the kernel oracle accepts
    pub kernels_only: bool,
    /// Verify the fissioned clone before committing it
    pub verify: bool,
    /// Analyze and transform without committing anything
    pub dry_run: bool,
}

impl Default for FissionConfig {
    fn default() -> Self {
        Self {
            allow_uncompared_counter: true,
            annotate_clones: true,
            kernels_only: true,
            verify: true,
            dry_run: false,
        }
    }
}

impl FissionConfig {
    /// Refuse counters without a located compare.
    pub fn strict() -> Self {
        Self {
            allow_uncompared_counter: false,
            ..Default::default()
        }
    }

    /// Consider every defined function, kernel or not.
    pub fn permissive() -> Self {
        Self {
            kernels_only: false,
            ..Default::default()
        }
    }
}

/// Furthest stage a function reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Stage {
    Classify,
    Region,
    InductionVariable,
    Dependence,
    Bounds,
    Split,
    Wire,
    Verify,
    Committed,
}

/// Pass/fail record of one candidate function.
#[derive(Debug, Clone, Serialize)]
pub struct FissionRecord {
    pub function: String,
    pub stage: Stage,
    /// Dependence verdict of the last analyzed loop
    pub verdict: Option<bool>,
    /// Run-local loop label, for matching log lines
    pub loop_label: Option<String>,
    pub loop_header: Option<String>,
    pub induction_variable: Option<String>,
    pub access_paths: Vec<AccessPathSummary>,
    /// Name of the committed clone
    pub fissioned: Option<String>,
    pub error: Option<FissionError>,
}

impl FissionRecord {
    fn new(function: &str) -> Self {
        Self {
            function: function.to_string(),
            stage: Stage::Classify,
            verdict: None,
            loop_label: None,
            loop_header: None,
            induction_variable: None,
            access_paths: Vec::new(),
            fissioned: None,
            error: None,
        }
    }

    fn fail(&mut self, error: FissionError) {
        warn!("{}", error.to_diagnostic());
        self.error = Some(error);
    }
}

/// A host launch stub and the fissioned kernel it launches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchPairing {
    pub stub: String,
    pub kernel: String,
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FissionReport {
    pub records: Vec<FissionRecord>,
    /// Functions that received a fissioned clone
    pub candidate_functions: Vec<String>,
    /// Launch stubs whose kernel was fissioned
    pub launch_stubs: Vec<LaunchPairing>,
    pub dry_run: bool,
}

impl FissionReport {
    /// Whether any function was fissioned.
    pub fn found_loop(&self) -> bool {
        !self.candidate_functions.is_empty()
    }

    pub fn record(&self, function: &str) -> Option<&FissionRecord> {
        self.records.iter().find(|r| r.function == function)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Loop fission over a module.
pub struct FissionPipeline {
    config: FissionConfig,
    kernels: Box<dyn KernelOracle>,
    region: Box<dyn RegionOracle>,
}

impl Default for FissionPipeline {
    fn default() -> Self {
        Self::new(FissionConfig::default())
    }
}

impl FissionPipeline {
    pub fn new(config: FissionConfig) -> Self {
        Self {
            config,
            kernels: Box::new(AnnotationOracle),
            region: Box::new(NoRegionOracle),
        }
    }

    pub fn with_kernel_oracle(mut self, oracle: impl KernelOracle + 'static) -> Self {
        self.kernels = Box::new(oracle);
        self
    }

    pub fn with_region_oracle(mut self, oracle: impl RegionOracle + 'static) -> Self {
        self.region = Box::new(oracle);
        self
    }

    pub fn config(&self) -> &FissionConfig {
        &self.config
    }

    /// Fission every candidate function of `module`.
    pub fn run(&self, module: &mut Module) -> FissionReport {
        let mut report = FissionReport {
            dry_run: self.config.dry_run,
            ..Default::default()
        };
        let mut loop_counter = 0usize;

        let names: Vec<String> = module.functions.iter().map(|f| f.name.clone()).collect();
        for name in names {
            let Some(index) = module.function_index(&name) else {
                continue;
            };
            let func = &module.functions[index];
            if self.kernels.is_launch_stub(func) {
                debug!("skipping launch stub @{}", name);
                continue;
            }
            let is_kernel = self.kernels.is_kernel(module, func);
            if self.config.kernels_only && !is_kernel {
                debug!("skipping @{}: not a kernel", name);
                continue;
            }

            let clone_name = fissioned_name(&name);
            let (mut record, clone) = if module.has_symbol(&clone_name) {
                let mut record = FissionRecord::new(&name);
                record.fail(FissionError::new(
                    FissionErrorKind::NotFissionable,
                    name.clone(),
                    format!("@{} already exists", clone_name),
                ));
                (record, None)
            } else {
                self.fission_function(func, &mut loop_counter)
            };

            if let Some(clone) = clone {
                if !self.config.dry_run {
                    module.insert_function_after(index, clone);
                    if is_kernel && self.config.annotate_clones {
                        module.annotate_kernel(&clone_name);
                    }
                    record.stage = Stage::Committed;
                }
                info!("fissioned @{} into @{}", name, clone_name);
                record.fissioned = Some(clone_name);
                report.candidate_functions.push(name);
            }
            report.records.push(record);
        }

        report.launch_stubs = self.pair_launch_stubs(module, &report.candidate_functions);

        if report.found_loop() {
            info!("Done. Found a valid loop for fission.");
        } else {
            info!("Done. No valid loop found for fission.");
        }
        report
    }

    /// Run every stage on a scratch copy of `func`. Returns the record and,
    /// on success, the verified clone.
    fn fission_function(&self, func: &Function, loop_counter: &mut usize) -> (FissionRecord, Option<Function>) {
        let mut record = FissionRecord::new(&func.name);
        let mut scratch = func.clone();

        let Some((lp, iv)) = self.select_loop(&scratch, loop_counter, &mut record) else {
            return (record, None);
        };

        match self.transform(&mut scratch, &lp, &iv, &mut record) {
            Ok(clone) => (record, Some(clone)),
            Err(err) => {
                record.fail(err);
                (record, None)
            }
        }
    }

    /// First outermost loop proven independent.
    fn select_loop(
        &self,
        func: &Function,
        loop_counter: &mut usize,
        record: &mut FissionRecord,
    ) -> Option<(Loop, InductionVariable)> {
        let info = analyze_loops(func);
        let finder = InductionFinder::new(self.config.allow_uncompared_counter);
        let mut last_error = None;

        for lp in info.outermost() {
            *loop_counter += 1;
            let label = format!("L{}", loop_counter);
            let header = func.block_name(lp.header).to_string();
            debug!("[{}] considering loop '{}' of @{}", label, header, func.name);
            record.loop_label = Some(label.clone());
            record.loop_header = Some(header);
            record.induction_variable = None;
            record.verdict = None;
            record.access_paths.clear();

            record.stage = Stage::Region;
            if self.region.verdict(func, lp) == Some(false) {
                last_error = Some(FissionError::new(
                    FissionErrorKind::RegionRejected,
                    func.name.clone(),
                    format!("loop {} rejected by the region oracle", label),
                ));
                continue;
            }

            record.stage = Stage::InductionVariable;
            let iv = match finder.find(func, lp) {
                Ok(iv) => iv,
                Err(err) => {
                    debug!("[{}] {}", label, err);
                    last_error = Some(err);
                    continue;
                }
            };
            let counter = func.value_name(&Value::Inst(iv.phi));
            info!("[{}] induction variable of @{}: %{}", label, func.name, counter);
            record.induction_variable = Some(counter);

            record.stage = Stage::Dependence;
            let result = DependenceAnalysis::new(func).analyze(iv.phi);
            record.verdict = Some(result.is_independent());
            record.access_paths = result.paths.iter().map(|p| p.summary(func)).collect();
            if result.is_independent() {
                return Some((lp.clone(), iv));
            }
            last_error = Some(FissionError::new(
                FissionErrorKind::DependentLoop,
                func.name.clone(),
                describe_conflict(func, &result),
            ));
        }

        record.fail(last_error.unwrap_or_else(|| {
            FissionError::new(
                FissionErrorKind::NoCandidateLoop,
                func.name.clone(),
                "function contains no loop",
            )
        }));
        None
    }

    fn transform(
        &self,
        scratch: &mut Function,
        lp: &Loop,
        iv: &InductionVariable,
        record: &mut FissionRecord,
    ) -> Result<Function, FissionError> {
        record.stage = Stage::Bounds;
        let bounds = extract_bounds(scratch, lp, iv)?;

        record.stage = Stage::Split;
        let pair = split_loop(scratch, lp, iv, &bounds)?;

        record.stage = Stage::Wire;
        let clone = wire_fission(scratch, &pair)?;

        record.stage = Stage::Verify;
        if self.config.verify {
            verify_function(&clone).map_err(|err| {
                FissionError::new(
                    FissionErrorKind::CloneFailed,
                    clone.name.clone(),
                    format!("fissioned function is malformed: {}", err),
                )
            })?;
        }
        Ok(clone)
    }

    fn pair_launch_stubs(&self, module: &Module, fissioned: &[String]) -> Vec<LaunchPairing> {
        module
            .functions
            .iter()
            .filter(|f| self.kernels.is_launch_stub(f))
            .filter_map(|stub| {
                let kernel = kernel_for_stub(module, &stub.name, self.kernels.as_ref())?;
                fissioned.contains(&kernel.name).then(|| LaunchPairing {
                    stub: stub.name.clone(),
                    kernel: kernel.name.clone(),
                })
            })
            .collect()
    }
}

fn describe_conflict(func: &Function, result: &DependenceResult) -> String {
    match result.conflict {
        Some(Conflict::AddressAfterAccess { access }) => format!(
            "address computed from a value already used by '{}'",
            format_instruction(func, access)
        ),
        Some(Conflict::PathMismatch { first, second }) => {
            let access = |i: usize| {
                result
                    .paths
                    .get(i)
                    .map(|p| format_instruction(func, p.access))
                    .unwrap_or_default()
            };
            format!(
                "'{}' and '{}' reach a shared base through different operators",
                access(first),
                access(second)
            )
        }
        None => "loop is independent".into(),
    }
}
