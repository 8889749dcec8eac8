#[cfg(test)]
mod tests {
    use pretvm_core::{
        Attribute, ConfigOverlay, Diagnostics, DomainMap, EntityRef, Environment, EnvironmentBuilder, NewReaction,
        ReactionId, TimeValue,
    };
    use pretvm_graph::{classify_connections, levelize, DependencyGraph};

    use crate::assigner::{Assigner, DomainInputs, PERIODIC_LABEL};
    use crate::instruction::{Instruction, Opcode, Operand, Register, SymbolRef};
    use crate::platform::UcPlatform;
    use crate::schedule::Schedule;
    use crate::timeline::Timeline;

    fn assign(env: &Environment, cores: usize, fast: bool) -> Schedule {
        let overlay = ConfigOverlay::extract(env, &mut Diagnostics::new());
        let domains = DomainMap::partition(env, &overlay);
        let classes = classify_connections(env, &overlay, &domains);
        let graph = DependencyGraph::build(env, &classes, &domains, 0);
        let levels = levelize(&graph, env).unwrap();
        let timeline = Timeline::build(env, graph.reactions(), 4096).unwrap();
        let inputs = DomainInputs { env, graph: &graph, levels: &levels, classes: &classes, overlay: &overlay };
        Assigner::new(inputs, &UcPlatform, cores).fast(fast).run(&timeline).unwrap()
    }

    fn opcodes(stream: &[Instruction]) -> Vec<Opcode> {
        stream.iter().map(|i| i.opcode).collect()
    }

    fn waits_on(inst: &Instruction, reg: Register, value: i64) -> bool {
        inst.opcode == Opcode::Wu && inst.operands == vec![Operand::Reg(reg), Operand::Imm(value)]
    }

    /// startup -> a.out -> c.in, with `readers` reactions on the input.
    fn fan_out(readers: usize) -> Environment {
        let mut b = EnvironmentBuilder::new("main");
        let a = b.add_reactor(b.main(), "a");
        let out = b.add_output(a, "out");
        let s = b.add_startup(a);
        b.add_reaction(a, NewReaction::new().on(s).writes(out));
        for i in 0..readers {
            let c = b.add_reactor(b.main(), &format!("c{}", i));
            let inp = b.add_input(c, "in");
            b.add_reaction(c, NewReaction::new().on_port(inp));
            b.connect(out, inp);
        }
        b.build().unwrap()
    }

    #[test]
    fn chain_stays_on_one_core() {
        let env = fan_out(1);
        let s = assign(&env, 2, false);

        assert_eq!(s.blocks.len(), 2);
        assert!(s.blocks.iter().all(|b| b.core == 0));
        assert_eq!(s.cores[1], vec![Instruction::stop()]);
        assert_eq!(
            opcodes(&s.cores[0]),
            vec![
                Opcode::Du,
                Opcode::Advi,
                Opcode::Exe,
                Opcode::Addi,
                Opcode::Advi,
                Opcode::Beq,
                Opcode::Jal,
                Opcode::Exe,
                Opcode::Addi,
                Opcode::Stp,
            ]
        );
        assert!(!s.cores[0].iter().any(|i| i.opcode == Opcode::Wu));
    }

    #[test]
    fn cross_core_edge_waits_for_producer() {
        let env = fan_out(2);
        let s = assign(&env, 2, false);

        let second = s.blocks.iter().find(|b| b.reaction == ReactionId(2)).unwrap();
        assert_eq!(second.core, 1);
        assert!(second.guarded);
        let stream = &s.cores[1];
        assert_eq!(stream[0], Instruction::delay_until(Register::Offset, 0));
        assert!(waits_on(&stream[1], Register::Counter(0), 1));
        assert_eq!(stream[2].opcode, Opcode::Advi);
        assert!(second.start <= 1 && second.invoke > 1);
    }

    #[test]
    fn guarded_block_jumps_over_body() {
        let env = fan_out(1);
        let s = assign(&env, 1, true);

        let block = s.blocks.iter().find(|b| b.guarded).unwrap();
        let code = &s.cores[0][block.start..block.end];
        let exe = &s.cores[0][block.invoke];
        assert_eq!(exe.operands[0], Operand::Ref(SymbolRef::ReactionBody(block.reaction)));

        let jal = code.iter().find(|i| i.opcode == Opcode::Jal).unwrap();
        let Operand::Label(skip) = &jal.operands[1] else { panic!("jump without label") };
        let tail = &s.cores[0][block.invoke + 1];
        assert!(tail.labels.contains(&skip.name));

        let beq = code.iter().find(|i| i.opcode == Opcode::Beq).unwrap();
        let Operand::Label(run) = &beq.operands[2] else { panic!("branch without label") };
        assert!(exe.labels.contains(&run.name));
    }

    #[test]
    fn fast_mode_drops_physical_waits() {
        let env = fan_out(2);
        let s = assign(&env, 2, true);
        assert!(s.cores.iter().flatten().all(|i| i.opcode != Opcode::Du));
    }

    #[test]
    fn periodic_phase_loops_behind_a_barrier() {
        let mut b = EnvironmentBuilder::new("main");
        for name in ["x", "y"] {
            let r = b.add_reactor(b.main(), name);
            let t = b.add_timer(r, "t", TimeValue::ZERO, TimeValue::millis(10));
            b.add_reaction(r, NewReaction::new().on(t));
        }
        let env = b.build().unwrap();
        let s = assign(&env, 2, false);

        assert_eq!(s.hyperperiod, Some(TimeValue::millis(10)));
        for stream in &s.cores {
            assert!(stream[0].labels.contains(&PERIODIC_LABEL.to_string()));
            assert_eq!(stream.last(), Some(&Instruction::jump(PERIODIC_LABEL)));
            assert!(!stream.iter().any(|i| i.opcode == Opcode::Stp));
        }
        // Core 1 ran one block and arrives with one more increment.
        assert!(s.cores[0].iter().any(|i| waits_on(i, Register::Counter(1), 2)));
        assert!(s.cores[0].contains(&Instruction::addi(Register::Offset, Register::Offset, 10_000_000)));
        assert!(s.cores[0].contains(&Instruction::addi(Register::BinarySema(1), Register::Zero, 1)));
        assert!(s.cores[1].iter().any(|i| waits_on(i, Register::BinarySema(1), 1)));
    }

    #[test]
    fn init_barrier_moves_offset_to_periodic_start() {
        let mut b = EnvironmentBuilder::new("main");
        let r = b.add_reactor(b.main(), "r");
        let s = b.add_startup(r);
        let t = b.add_timer(r, "t", TimeValue::millis(5), TimeValue::millis(10));
        b.add_reaction(r, NewReaction::new().on(s));
        b.add_reaction(r, NewReaction::new().on(t));
        let env = b.build().unwrap();
        let sched = assign(&env, 1, false);

        let stream = &sched.cores[0];
        let advance = stream
            .iter()
            .position(|i| *i == Instruction::addi(Register::Offset, Register::Offset, 5_000_000))
            .unwrap();
        let periodic = stream.iter().position(|i| i.labels.iter().any(|l| l == PERIODIC_LABEL)).unwrap();
        assert!(advance < periodic);
    }

    #[test]
    fn reactor_moved_between_cores_waits_for_previous_step() {
        let mut b = EnvironmentBuilder::new("main");
        let x = b.add_reactor(b.main(), "x");
        let tx = b.add_timer(x, "t", TimeValue::ZERO, TimeValue::millis(10));
        b.add_reaction(x, NewReaction::new().on(tx));
        let y = b.add_reactor(b.main(), "y");
        let ty = b.add_timer(y, "t", TimeValue::ZERO, TimeValue::millis(5));
        b.add_reaction(y, NewReaction::new().on(ty));
        let env = b.build().unwrap();
        let s = assign(&env, 2, false);

        let ys: Vec<_> = s.blocks_of(ReactionId(1)).collect();
        assert_eq!(ys.len(), 2);
        assert_eq!((ys[0].core, ys[1].core), (1, 0));
        let later = &s.cores[0][ys[1].start..ys[1].invoke];
        assert!(later.iter().any(|i| waits_on(i, Register::Counter(1), 1)));
    }

    #[test]
    fn buffered_connection_is_prepared_and_cleaned_around_reader() {
        let mut b = EnvironmentBuilder::new("main");
        let a = b.add_reactor(b.main(), "a");
        let c = b.add_reactor(b.main(), "c");
        let out = b.add_output(a, "out");
        let inp = b.add_input(c, "in");
        let s = b.add_startup(a);
        b.add_reaction(a, NewReaction::new().on(s).writes(out));
        b.add_reaction(c, NewReaction::new().on_port(inp));
        let conn = b.connect(out, inp);
        b.attribute(EntityRef::Connection(conn), Attribute::with_value("buffer", "2"));
        let env = b.build().unwrap();
        let sched = assign(&env, 1, false);

        let block = sched.blocks_of(ReactionId(1)).next().unwrap();
        assert_eq!(block.prepares, vec![conn]);
        assert_eq!(block.cleanups, vec![conn]);

        let stream = &sched.cores[0];
        let prepare = stream
            .iter()
            .position(|i| i.exe_target() == Some(SymbolRef::Prepare(conn)))
            .unwrap();
        let cleanup = stream
            .iter()
            .position(|i| i.exe_target() == Some(SymbolRef::Cleanup(conn)))
            .unwrap();
        assert!(block.start <= prepare && prepare < block.invoke);
        assert!(block.invoke < cleanup && cleanup < block.end);
        assert_eq!(stream[prepare].operands[2], Operand::Imm(2));

        // The guard reads the prepared port, so it comes after the prepare.
        let guard = stream.iter().position(|i| i.opcode == Opcode::Beq).unwrap();
        assert!(prepare < guard);
    }

    #[test]
    fn delayed_connection_reader_is_event_driven() {
        let mut b = EnvironmentBuilder::new("main");
        let a = b.add_reactor(b.main(), "a");
        let c = b.add_reactor(b.main(), "c");
        let out = b.add_output(a, "out");
        let inp = b.add_input(c, "in");
        let t = b.add_timer(a, "t", TimeValue::ZERO, TimeValue::millis(4));
        b.add_reaction(a, NewReaction::new().on(t).writes(out));
        b.add_reaction(c, NewReaction::new().on_port(inp));
        let conn = b.connect_delayed(out, inp, TimeValue::millis(2));
        let env = b.build().unwrap();
        let sched = assign(&env, 2, false);

        // The reader is scheduled at every step and checks the queue head first.
        let reader: Vec<_> = sched.blocks_of(ReactionId(1)).collect();
        assert!(!reader.is_empty());
        for block in reader {
            assert!(block.guarded);
            let stream = &sched.cores[block.core];
            let head = stream[block.start..block.invoke]
                .iter()
                .find(|i| i.opcode == Opcode::Bne)
                .unwrap();
            assert_eq!(head.operands[0], Operand::Ref(SymbolRef::QueueHeadTime(inp)));
            assert_eq!(block.prepares, vec![conn]);
        }
    }

    #[test]
    fn assignment_is_deterministic() {
        let env = fan_out(5);
        let a = assign(&env, 3, false);
        let b = assign(&env, 3, false);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
