//! The PRET-VM instruction set.
//!
//! Registers and immediates are 64-bit. Every instruction takes at most three
//! operands. Operands start out symbolic ([`Operand::Ref`], unresolved
//! labels) and are rewritten into platform symbols by [`crate::resolve`].

use std::fmt;

use pretvm_core::{ConnectionId, PortId, ReactionId, ReactorId, TriggerId};
use serde::{Deserialize, Serialize};

// ── Opcodes ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Opcode {
    /// `ADD dst, a, b`: dst = a + b.
    Add,
    /// `ADDI dst, src, imm`: dst = src + imm.
    Addi,
    /// `ADV time, base, inc`: advance a reactor's logical time to base + inc.
    Adv,
    /// `ADVI time, base, imm`.
    Advi,
    /// `BEQ a, b, label`: branch when a == b.
    Beq,
    Bge,
    Blt,
    /// `BNE a, b, label`: branch when a != b.
    Bne,
    /// `DU base, imm`: delay until physical time reaches base + imm.
    Du,
    /// `EXE fn, arg, arg2`: call a platform function.
    Exe,
    /// `JAL ret, label`: jump, saving the return address in `ret`.
    Jal,
    /// `JALR ret, base, offset`.
    Jalr,
    /// Stop this worker.
    Stp,
    /// `WLT reg, imm`: wait while reg >= imm.
    Wlt,
    /// `WU reg, imm`: wait until reg >= imm.
    Wu,
}

impl Opcode {
    pub const ALL: [Opcode; 15] = [
        Opcode::Add,
        Opcode::Addi,
        Opcode::Adv,
        Opcode::Advi,
        Opcode::Beq,
        Opcode::Bge,
        Opcode::Blt,
        Opcode::Bne,
        Opcode::Du,
        Opcode::Exe,
        Opcode::Jal,
        Opcode::Jalr,
        Opcode::Stp,
        Opcode::Wlt,
        Opcode::Wu,
    ];

    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::Beq | Opcode::Bge | Opcode::Blt | Opcode::Bne)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Opcode::Add => "ADD",
            Opcode::Addi => "ADDI",
            Opcode::Adv => "ADV",
            Opcode::Advi => "ADVI",
            Opcode::Beq => "BEQ",
            Opcode::Bge => "BGE",
            Opcode::Blt => "BLT",
            Opcode::Bne => "BNE",
            Opcode::Du => "DU",
            Opcode::Exe => "EXE",
            Opcode::Jal => "JAL",
            Opcode::Jalr => "JALR",
            Opcode::Stp => "STP",
            Opcode::Wlt => "WLT",
            Opcode::Wu => "WU",
        };
        f.write_str(s)
    }
}

// ── Operands ──────────────────────────────────────────────────

/// Virtual machine registers. Per-core registers are indexed by core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Register {
    /// Always 0.
    Zero,
    /// Always 1.
    One,
    /// Start of the current phase iteration in absolute time.
    Offset,
    /// Blocks completed on a core since the last barrier.
    Counter(usize),
    BinarySema(usize),
    ReturnAddr(usize),
    Temp(usize),
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Zero => write!(f, "zero"),
            Register::One => write!(f, "one"),
            Register::Offset => write!(f, "offset"),
            Register::Counter(c) => write!(f, "counter[{}]", c),
            Register::BinarySema(c) => write!(f, "binary_sema[{}]", c),
            Register::ReturnAddr(c) => write!(f, "return_addr[{}]", c),
            Register::Temp(i) => write!(f, "temp[{}]", i),
        }
    }
}

/// A reference to a program entity that the platform turns into a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolRef {
    ReactorState(ReactorId),
    ReactorTime(ReactorId),
    PortData(PortId),
    PortPresent(PortId),
    ReactionBody(ReactionId),
    /// Resolves to `Null` when the reaction has no deadline.
    DeadlineHandler(ReactionId),
    /// Event queue head of an action, owned by the main reactor.
    QueueHead(TriggerId),
    /// Tag time of the next pending event on an input port.
    QueueHeadTime(PortId),
    Prepare(ConnectionId),
    PrepareArg(ConnectionId),
    Cleanup(ConnectionId),
    CleanupArg1(ConnectionId),
    CleanupArg2(ConnectionId),
}

impl fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolRef::ReactorState(r) => write!(f, "state({})", r),
            SymbolRef::ReactorTime(r) => write!(f, "time({})", r),
            SymbolRef::PortData(p) => write!(f, "data({})", p),
            SymbolRef::PortPresent(p) => write!(f, "present({})", p),
            SymbolRef::ReactionBody(r) => write!(f, "body({})", r),
            SymbolRef::DeadlineHandler(r) => write!(f, "deadline_handler({})", r),
            SymbolRef::QueueHead(t) => write!(f, "queue_head({})", t),
            SymbolRef::QueueHeadTime(p) => write!(f, "queue_head_time({})", p),
            SymbolRef::Prepare(c) => write!(f, "prepare({})", c),
            SymbolRef::PrepareArg(c) => write!(f, "prepare_arg({})", c),
            SymbolRef::Cleanup(c) => write!(f, "cleanup({})", c),
            SymbolRef::CleanupArg1(c) => write!(f, "cleanup_arg1({})", c),
            SymbolRef::CleanupArg2(c) => write!(f, "cleanup_arg2({})", c),
        }
    }
}

/// A resolved platform symbol, e.g. `&(main_reactor.a->out->super.super.is_present)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A jump target. Names are unique per core; `target` is the instruction
/// index, filled in by resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<usize>,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), target: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    Imm(i64),
    Reg(Register),
    Label(Label),
    Ref(SymbolRef),
    Symbol(Symbol),
    Null,
}

impl Operand {
    pub fn is_resolved(&self) -> bool {
        match self {
            Operand::Imm(_) | Operand::Symbol(_) | Operand::Null => true,
            Operand::Label(l) => l.target.is_some(),
            Operand::Reg(_) | Operand::Ref(_) => false,
        }
    }

    pub fn as_reg(&self) -> Option<Register> {
        match self {
            Operand::Reg(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_imm(&self) -> Option<i64> {
        match self {
            Operand::Imm(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<SymbolRef> {
        match self {
            Operand::Ref(r) => Some(*r),
            _ => None,
        }
    }
}

impl From<Register> for Operand {
    fn from(r: Register) -> Self {
        Operand::Reg(r)
    }
}

impl From<SymbolRef> for Operand {
    fn from(r: SymbolRef) -> Self {
        Operand::Ref(r)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm(v) => write!(f, "{}", v),
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Label(l) => match l.target {
                Some(t) => write!(f, "{} (@{})", l.name, t),
                None => write!(f, "{}", l.name),
            },
            Operand::Ref(r) => write!(f, "{}", r),
            Operand::Symbol(s) => write!(f, "{}", s),
            Operand::Null => write!(f, "NULL"),
        }
    }
}

// ── Instructions ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    /// Labels that name this instruction's position.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        debug_assert!(operands.len() <= 3);
        Self { opcode, operands, labels: Vec::new() }
    }

    pub fn addi(dst: Register, src: Register, imm: i64) -> Self {
        Self::new(Opcode::Addi, vec![dst.into(), src.into(), Operand::Imm(imm)])
    }

    /// `ADVI time(reactor), offset, t`.
    pub fn advance(reactor: ReactorId, t: i64) -> Self {
        Self::new(
            Opcode::Advi,
            vec![SymbolRef::ReactorTime(reactor).into(), Register::Offset.into(), Operand::Imm(t)],
        )
    }

    pub fn delay_until(base: Register, t: i64) -> Self {
        Self::new(Opcode::Du, vec![base.into(), Operand::Imm(t)])
    }

    pub fn wait_until(reg: Register, value: i64) -> Self {
        Self::new(Opcode::Wu, vec![reg.into(), Operand::Imm(value)])
    }

    pub fn exe(function: Operand, arg: Operand, arg2: Operand) -> Self {
        Self::new(Opcode::Exe, vec![function, arg, arg2])
    }

    pub fn branch(opcode: Opcode, a: Operand, b: Operand, target: &str) -> Self {
        debug_assert!(opcode.is_branch());
        Self::new(opcode, vec![a, b, Operand::Label(Label::new(target))])
    }

    /// `JAL zero, label`: unconditional jump.
    pub fn jump(target: &str) -> Self {
        Self::new(Opcode::Jal, vec![Register::Zero.into(), Operand::Label(Label::new(target))])
    }

    pub fn stop() -> Self {
        Self::new(Opcode::Stp, Vec::new())
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.operands.iter().all(Operand::is_resolved)
    }

    /// The function operand of an `EXE`, if still symbolic.
    pub fn exe_target(&self) -> Option<SymbolRef> {
        if self.opcode == Opcode::Exe {
            self.operands.first().and_then(Operand::as_ref)
        } else {
            None
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { " " } else { ", " }, op)?;
        }
        Ok(())
    }
}
