use anyhow::{bail, Context, Result};
use pretvm_core::attributes::{validate, ATTRIBUTE_SPECS};
use pretvm_core::description::ProgramDescription;
use pretvm_core::{ConfigOverlay, Diagnostics, Environment, Severity};
use pretvm_graph::{to_dot, DotOptions};
use pretvm_scheduler::{CompiledProgram, Compiler, DomainAnalysis, DomainSchedule};
use std::fmt::Write as _;
use std::path::Path;
use tracing::{error, info, warn};

use crate::cli::{CompileArgs, OutputFormat};
use crate::config::resolve_target;

// ── compile ───────────────────────────────────────────────────

pub fn compile(args: &CompileArgs) -> Result<()> {
    let rendered = compile_to_string(args)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("failed to write output: {}", path.display()))?;
            info!(path = %path.display(), bytes = rendered.len(), "Schedule written");
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

fn compile_to_string(args: &CompileArgs) -> Result<String> {
    let desc = ProgramDescription::from_file(&args.program)
        .with_context(|| format!("failed to load program: {}", args.program.display()))?;

    let mut diags = Diagnostics::new();
    let config = resolve_target(&desc, args, &mut diags)?;
    let env = desc
        .build_environment()
        .with_context(|| format!("failed to instantiate program: {}", args.program.display()))?;
    validate(&env, &mut diags);
    let overlay = ConfigOverlay::extract(&env, &mut diags);
    report(&diags);
    if diags.has_errors() {
        bail!("{} error(s) in {}", diags.errors().count(), args.program.display());
    }
    config.log_summary();

    let compiler = Compiler::new(&env, &overlay, &config, available_cores())?;
    let analyses = compiler.analyze_all()?;
    let mut domains = Vec::with_capacity(analyses.len());
    for analysis in &analyses {
        let scheduled = compiler.schedule_domain(analysis)?;
        scheduled.stats().log(&scheduled.name);
        if let Some(dir) = &args.dot {
            write_dot(dir, &env, analysis, &scheduled)?;
        }
        domains.push(scheduled);
    }
    let program = CompiledProgram { cores: compiler.cores(), domains };
    info!(fingerprint = %program.fingerprint(), "Program compiled");

    match args.format {
        OutputFormat::Json => Ok(program.to_json().context("failed to serialize schedule")? + "\n"),
        OutputFormat::Listing => Ok(listing(&program, &env)),
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn report(diags: &Diagnostics) {
    for d in diags.iter() {
        match d.severity {
            Severity::Error => error!("{}", d),
            Severity::Warning => warn!("{}", d),
            Severity::Info => info!("{}", d),
        }
    }
}

fn listing(program: &CompiledProgram, env: &Environment) -> String {
    let mut out = String::new();
    for domain in &program.domains {
        let _ = writeln!(out, "; domain {} ({}, {})", domain.name, domain.kind, domain.platform);
        for (action, limit) in &domain.pending_event_limits {
            let _ = writeln!(out, "; max_pending_events {} = {}", action, limit);
        }
        out.push_str(&domain.schedule.listing(env));
        out.push('\n');
    }
    out
}

/// Raw, pruned and partitioned graphs of one domain, one file each.
fn write_dot(dir: &Path, env: &Environment, analysis: &DomainAnalysis, scheduled: &DomainSchedule) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let stem = analysis.name.replace('.', "_");
    let partition = scheduled.schedule.partition();
    let views = [
        ("raw", to_dot(&analysis.raw, env, &DotOptions { title: Some(analysis.name.as_str()), ..DotOptions::default() })),
        (
            "pruned",
            to_dot(
                &analysis.graph,
                env,
                &DotOptions { title: Some(analysis.name.as_str()), levels: Some(&analysis.levels), partition: None },
            ),
        ),
        (
            "partitioned",
            to_dot(
                &analysis.graph,
                env,
                &DotOptions { title: Some(analysis.name.as_str()), levels: Some(&analysis.levels), partition: Some(&partition) },
            ),
        ),
    ];
    for (view, text) in views {
        let path = dir.join(format!("{}.{}.dot", stem, view));
        std::fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

// ── attributes ────────────────────────────────────────────────

pub fn attribute_table() -> String {
    let mut out = String::new();
    for (name, spec) in ATTRIBUTE_SPECS.iter() {
        let targets: Vec<String> = spec.targets.iter().map(ToString::to_string).collect();
        let params = match spec.params {
            None => "-".to_string(),
            Some(params) => params
                .iter()
                .map(|p| if p.optional { format!("[{}]", p.name) } else { p.name.to_string() })
                .collect::<Vec<_>>()
                .join(" "),
        };
        let _ = writeln!(out, "@{:<20} {:<40} {}", name, params, targets.join(","));
    }
    out
}
