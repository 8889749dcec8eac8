//! End-to-end scheduling of the sample programs in `data/programs/`.

use pretvm_core::description::ProgramDescription;
use pretvm_core::{
    ConfigOverlay, Diagnostics, DomainKind, Environment, PlatformType, ReactionId, TargetConfig, TimeValue,
};
use pretvm_graph::{connection_readers, GraphError, NodeKey};
use pretvm_scheduler::{
    compile, BlockInfo, CompiledProgram, Compiler, Opcode, Operand, PlatformResolver, Register, ResolveContext,
    Resolver, Schedule, SchedulerError, SymbolRef, UcPlatform,
};

/// Integration tests run from the crate directory, so we go up two levels.
fn programs_dir() -> std::path::PathBuf {
    let manifest = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest.join("../../data/programs")
}

fn load(filename: &str) -> (Environment, ConfigOverlay, TargetConfig) {
    let path = programs_dir().join(filename);
    let desc = ProgramDescription::from_file(&path)
        .unwrap_or_else(|e| panic!("Failed to parse {}: {}", path.display(), e));
    let env = desc.build_environment().unwrap();
    let mut diags = Diagnostics::new();
    let config = desc.target_config(&mut diags);
    let overlay = ConfigOverlay::extract(&env, &mut diags);
    assert!(!diags.has_errors(), "{}: {:?}", filename, diags.iter().collect::<Vec<_>>());
    (env, overlay, config)
}

fn compile_sample(filename: &str, available: usize) -> Result<CompiledProgram, SchedulerError> {
    let (env, overlay, config) = load(filename);
    compile(&env, &overlay, &config, available)
}

fn reaction_named(env: &Environment, name: &str) -> ReactionId {
    env.reactions.iter().find(|r| r.full_name == name).unwrap().id
}

/// Whether the block waits, before invoking its reaction, for `core` to
/// reach at least `count`.
fn waits_for(schedule: &Schedule, block: &BlockInfo, core: usize, count: u32) -> bool {
    waits_between(schedule, block.core, block.start, block.invoke, core, count)
}

fn waits_between(schedule: &Schedule, on: usize, from: usize, to: usize, core: usize, count: u32) -> bool {
    let counter = Operand::Symbol(UcPlatform.register(Register::Counter(core)));
    schedule.cores[on][from..to].iter().any(|inst| {
        inst.opcode == Opcode::Wu
            && inst.operands[0] == counter
            && inst.operands[1].as_imm().is_some_and(|n| n >= i64::from(count))
    })
}

// ── Scenario A ──────────────────────────────────────────────

#[test]
fn scenario_a_priority_order_on_one_core() {
    let (env, overlay, config) = load("scenario_a.yaml");
    let program = compile(&env, &overlay, &config, 8).unwrap();
    assert_eq!(program.cores, 1);

    let schedule = &program.domains[0].schedule;
    assert_eq!(schedule.core_count(), 1);
    assert!(schedule.is_resolved());

    let first = schedule.blocks_of(reaction_named(&env, "main.r.reaction_1")).next().unwrap();
    let second = schedule.blocks_of(reaction_named(&env, "main.r.reaction_2")).next().unwrap();
    assert!(first.invoke < second.invoke);
    assert_eq!(schedule.cores[0].last().map(|i| i.opcode), Some(Opcode::Stp));
}

// ── Scenario B ──────────────────────────────────────────────

#[test]
fn scenario_b_independent_reactions_need_no_sync() {
    let (env, overlay, config) = load("scenario_b.yaml");
    let program = compile(&env, &overlay, &config, 8).unwrap();
    let schedule = &program.domains[0].schedule;

    assert_eq!(schedule.core_count(), 2);
    let left = schedule.blocks_of(reaction_named(&env, "main.left.reaction_1")).next().unwrap();
    let right = schedule.blocks_of(reaction_named(&env, "main.right.reaction_1")).next().unwrap();
    assert_ne!(left.core, right.core);
    assert!(schedule.cores.iter().flatten().all(|i| i.opcode != Opcode::Wu));
}

// ── Scenario C ──────────────────────────────────────────────

#[test]
fn scenario_c_one_prepare_and_one_cleanup() {
    let (env, overlay, config) = load("scenario_c.yaml");
    let program = compile(&env, &overlay, &config, 8).unwrap();
    let schedule = &program.domains[0].schedule;
    let conn = env.connections[0].id;

    let preparing: Vec<&BlockInfo> = schedule.blocks.iter().filter(|b| b.prepares.contains(&conn)).collect();
    let cleaning: Vec<&BlockInfo> = schedule.blocks.iter().filter(|b| b.cleanups.contains(&conn)).collect();
    assert_eq!(preparing.len(), 1);
    assert_eq!(cleaning.len(), 1);

    let first = schedule.blocks_of(reaction_named(&env, "main.sink.reaction_1")).next().unwrap();
    let last = schedule.blocks_of(reaction_named(&env, "main.sink.reaction_2")).next().unwrap();
    assert_eq!(preparing[0], first);
    assert_eq!(cleaning[0], last);

    // Only injected calls are EXEs outside the invocation itself.
    let stream = &schedule.cores[first.core];
    let prepares: Vec<_> = stream[first.start..first.invoke].iter().filter(|i| i.opcode == Opcode::Exe).collect();
    assert_eq!(prepares.len(), 1);
    assert_eq!(prepares[0].operands[2], Operand::Imm(4));

    let stream = &schedule.cores[last.core];
    let cleanups = stream[last.invoke + 1..last.end].iter().filter(|i| i.opcode == Opcode::Exe).count();
    assert_eq!(cleanups, 1);
}

// ── Scenario D ──────────────────────────────────────────────

#[test]
fn scenario_d_cycle_names_both_reactions() {
    let err = compile_sample("scenario_d.yaml", 8).unwrap_err();
    match err {
        SchedulerError::Graph(GraphError::Cycle { reactions, .. }) => {
            assert!(reactions.contains(&"main.x.reaction_1".to_string()), "{:?}", reactions);
            assert!(reactions.contains(&"main.y.reaction_1".to_string()), "{:?}", reactions);
        }
        other => panic!("expected a cycle, got {other}"),
    }
}

// ── Scenario E ──────────────────────────────────────────────

#[test]
fn scenario_e_matches_scenario_a_on_a_single_core_host() {
    let a = compile_sample("scenario_a.yaml", 1).unwrap();
    let e = compile_sample("scenario_e.yaml", 1).unwrap();
    assert_eq!(e.cores, 1);
    assert_eq!(a, e);
    assert_eq!(a.fingerprint(), e.fingerprint());
}

// ── Properties ──────────────────────────────────────────────

#[test]
fn compilation_is_deterministic() {
    for name in ["sensor_pipeline.yaml", "federated.yaml", "scenario_c.yaml"] {
        let first = compile_sample(name, 4).unwrap();
        let second = compile_sample(name, 4).unwrap();
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap(), "{}", name);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }
}

#[test]
fn every_cross_core_edge_is_synchronized() {
    let (env, overlay, config) = load("sensor_pipeline.yaml");
    let compiler = Compiler::new(&env, &overlay, &config, 8).unwrap();
    let analysis = compiler.analyze(0).unwrap();
    let schedule = compiler.schedule_domain(&analysis).unwrap().schedule;
    assert_eq!(schedule.core_count(), 3);

    let mut cross_core = 0;
    for consumer in &schedule.blocks {
        for producer_id in analysis.graph.reaction_predecessors(NodeKey::Reaction(consumer.reaction)) {
            let Some(producer) = schedule.blocks.iter().find(|b| b.step == consumer.step && b.reaction == producer_id)
            else {
                continue;
            };
            if producer.core == consumer.core {
                assert!(producer.end <= consumer.start);
                continue;
            }
            cross_core += 1;
            assert!(
                waits_for(&schedule, consumer, producer.core, producer.count),
                "{} does not wait for {}",
                env.reaction(consumer.reaction).full_name,
                env.reaction(producer.reaction).full_name
            );
        }
    }
    assert!(cross_core > 0, "sample should exercise cross-core edges");
}

#[test]
fn prepares_precede_and_cleanups_follow_every_reader() {
    for name in ["sensor_pipeline.yaml", "scenario_c.yaml", "federated.yaml"] {
        let (env, overlay, config) = load(name);
        let compiler = Compiler::new(&env, &overlay, &config, 8).unwrap();
        let program = compiler.compile().unwrap();

        for domain in &program.domains {
            let schedule = &domain.schedule;
            for host in schedule.blocks.iter().filter(|b| !b.prepares.is_empty()) {
                for conn in &host.prepares {
                    let readers = connection_readers(&env, compiler.classes(), *conn);
                    for reader in schedule.blocks.iter().filter(|b| b.step == host.step && readers.contains(&b.reaction)) {
                        if reader == host {
                            continue;
                        }
                        if reader.core == host.core {
                            assert!(host.end <= reader.start, "{}", name);
                        } else {
                            assert!(waits_for(schedule, reader, host.core, host.count), "{}", name);
                        }
                    }
                }
            }
            for host in schedule.blocks.iter().filter(|b| !b.cleanups.is_empty()) {
                for conn in &host.cleanups {
                    let readers = connection_readers(&env, compiler.classes(), *conn);
                    for reader in schedule.blocks.iter().filter(|b| b.step == host.step && readers.contains(&b.reaction)) {
                        if reader == host {
                            continue;
                        }
                        if reader.core == host.core {
                            assert!(reader.end <= host.start, "{}", name);
                        } else {
                            assert!(
                                waits_between(schedule, host.core, host.invoke + 1, host.end, reader.core, reader.count),
                                "{}",
                                name
                            );
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn resolving_a_reference_twice_is_idempotent() {
    let (env, _, _) = load("scenario_c.yaml");
    let buffers = [env.connections[0].id];
    let mut resolver = Resolver::new(&UcPlatform, ResolveContext::new(&env, &buffers));
    for reference in [
        SymbolRef::Prepare(env.connections[0].id),
        SymbolRef::PortPresent(env.connections[0].destination),
        SymbolRef::ReactionBody(ReactionId(0)),
    ] {
        let first = resolver.reference(reference).unwrap();
        let second = resolver.reference(reference).unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);
    }
}

// ── Domains ─────────────────────────────────────────────────

#[test]
fn federates_are_scheduled_separately() {
    let (env, overlay, config) = load("federated.yaml");
    let program = compile(&env, &overlay, &config, 8).unwrap();
    let names: Vec<&str> = program.domains.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["main", "main.producer", "main.consumer"]);

    let producer = program.domain("main.producer").unwrap();
    assert!(producer.clock_sync.as_ref().is_some_and(|c| c.grandmaster));
    assert_eq!(producer.platform, PlatformType::Linux);

    let consumer = program.domain("main.consumer").unwrap();
    assert_eq!(consumer.max_wait, TimeValue::millis(10));
    assert_eq!(consumer.platform, PlatformType::Zephyr);

    let reader = reaction_named(&env, "main.consumer.reaction_2");
    let blocks: Vec<_> = consumer.schedule.blocks_of(reader).collect();
    assert!(!blocks.is_empty());
    assert!(blocks.iter().all(|b| b.guarded && b.prepares.len() == 1));
    // The networked reader never shows up in the producer's schedule.
    assert_eq!(producer.schedule.blocks_of(reader).count(), 0);
}

#[test]
fn enclaves_are_scheduled_separately() {
    let (env, overlay, config) = load("enclave.yaml");
    let program = compile(&env, &overlay, &config, 8).unwrap();
    let kinds: Vec<(&str, DomainKind)> = program.domains.iter().map(|d| (d.name.as_str(), d.kind)).collect();
    assert_eq!(kinds, vec![("main", DomainKind::Main), ("main.worker", DomainKind::Enclave)]);

    let conn = env.connections[0].id;
    let main = program.domain("main").unwrap();
    let worker = program.domain("main.worker").unwrap();
    assert!(worker.schedule.is_resolved());

    // Connection code belongs to the receiving side only.
    assert_eq!(worker.schedule.blocks.iter().filter(|b| b.prepares.contains(&conn)).count(), 1);
    assert_eq!(worker.schedule.blocks.iter().filter(|b| b.cleanups.contains(&conn)).count(), 1);
    assert!(main.schedule.blocks.iter().all(|b| !b.prepares.contains(&conn) && !b.cleanups.contains(&conn)));

    let reader = reaction_named(&env, "main.worker.reaction_2");
    assert!(worker.schedule.blocks_of(reader).all(|b| b.guarded));
    assert_eq!(main.schedule.blocks_of(reader).count(), 0);
    let writer = reaction_named(&env, "main.source.reaction_1");
    assert!(main.schedule.blocks_of(writer).count() > 0);
    assert_eq!(worker.schedule.blocks_of(writer).count(), 0);
}

#[test]
fn pending_event_limits_reach_the_output() {
    let program = compile_sample("sensor_pipeline.yaml", 8).unwrap();
    let limits = &program.domains[0].pending_event_limits;
    assert_eq!(limits.len(), 1);
    assert_eq!(limits.get("main.logger.flush"), Some(&8));

    let back: CompiledProgram = serde_json::from_str(&program.to_json().unwrap()).unwrap();
    assert_eq!(back.domains[0].pending_event_limits, *limits);

    // Unbounded programs leave the field out entirely.
    let plain = compile_sample("scenario_c.yaml", 8).unwrap();
    assert!(plain.domains[0].pending_event_limits.is_empty());
    assert!(!plain.to_json().unwrap().contains("pending_event_limits"));
}

#[test]
fn listing_names_every_scheduled_reaction() {
    let (env, overlay, config) = load("sensor_pipeline.yaml");
    let program = compile(&env, &overlay, &config, 8).unwrap();
    let listing = program.domains[0].schedule.listing(&env);
    for block in &program.domains[0].schedule.blocks {
        assert!(listing.contains(&env.reaction(block.reaction).full_name));
    }
    assert!(listing.contains("core 2:"));
}
