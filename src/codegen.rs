//! Code generation: lower the parsed AST into Intel-syntax x86-64 assembly.
//!
//! Expressions are evaluated on a small stack of scratch registers. Each
//! expression pushes exactly one value; binary operators combine the top two
//! entries into one. The pool is fixed, so a sufficiently deep expression is
//! rejected instead of being spilled. `r12`-`r15` are callee-saved and are
//! preserved in a 32-byte block at the top of the frame, with locals living
//! below it, addressed relative to `rbp`.

use tracing::{debug, trace};

use crate::error::{CompileError, CompileResult};
use crate::parser::{BinaryOp, Function, Node};

/// Scratch registers, in allocation order.
const REGS: [&str; 6] = ["r10", "r11", "r12", "r13", "r14", "r15"];

/// Callee-saved members of `REGS`, spilled in the prologue.
const SAVED_REGS: [&str; 4] = ["r12", "r13", "r14", "r15"];

const SAVE_AREA_SIZE: usize = 8 * SAVED_REGS.len();

fn align_to(n: usize, align: usize) -> usize {
  n.div_ceil(align) * align
}

/// Give every local a stack slot below the register save area and size the
/// frame. Slots are handed out most-recently-declared first.
pub fn assign_lvar_offsets(func: &mut Function) {
  let mut offset = SAVE_AREA_SIZE;
  for var in func.locals.iter_mut().rev() {
    offset += 8;
    var.offset = offset;
    trace!(var = %var.name, offset, "assigned stack slot");
  }
  func.stack_size = align_to(offset, 16);
  debug!(
    locals = func.locals.len(),
    stack_size = func.stack_size,
    "laid out frame"
  );
}

/// Emit assembly for a function whose frame has already been laid out.
pub fn generate(func: &Function) -> CompileResult<String> {
  let mut cg = CodeGen {
    func,
    asm: String::new(),
    top: 0,
    label_seq: 0,
  };

  cg.asm.push_str(".intel_syntax noprefix\n");
  cg.asm.push_str(".globl main\n");
  cg.asm.push_str("main:\n");

  cg.emit("push rbp");
  cg.emit("mov rbp, rsp");
  cg.emit(format!("sub rsp, {}", func.stack_size));
  for (i, reg) in SAVED_REGS.iter().enumerate() {
    cg.emit(format!("mov [rbp-{}], {reg}", 8 * (i + 1)));
  }

  for stmt in &func.body {
    cg.gen_stmt(stmt)?;
    assert_eq!(cg.top, 0, "register stack is unbalanced after a statement");
  }

  cg.asm.push_str(".L.return:\n");
  for (i, reg) in SAVED_REGS.iter().enumerate() {
    cg.emit(format!("mov {reg}, [rbp-{}]", 8 * (i + 1)));
  }
  cg.emit("mov rsp, rbp");
  cg.emit("pop rbp");
  cg.emit("ret");

  debug!(labels = cg.label_seq, "generated assembly");
  Ok(cg.asm)
}

struct CodeGen<'a> {
  func: &'a Function,
  asm: String,
  /// Depth of the scratch register stack.
  top: usize,
  label_seq: usize,
}

impl CodeGen<'_> {
  fn emit(&mut self, instr: impl AsRef<str>) {
    self.asm.push_str("    ");
    self.asm.push_str(instr.as_ref());
    self.asm.push('\n');
  }

  fn label(&mut self, name: &str) {
    self.asm.push_str(name);
    self.asm.push_str(":\n");
  }

  fn next_label_seq(&mut self) -> usize {
    let seq = self.label_seq;
    self.label_seq += 1;
    seq
  }

  /// Claim the next free scratch register.
  fn push_reg(&mut self) -> CompileResult<&'static str> {
    if self.top >= REGS.len() {
      return Err(CompileError::internal(format!(
        "register out of range: {} (expression nests deeper than {} registers)",
        self.top,
        REGS.len()
      )));
    }
    let reg = REGS[self.top];
    self.top += 1;
    Ok(reg)
  }

  /// Release the topmost register and return its name.
  fn pop_reg(&mut self) -> &'static str {
    assert!(self.top > 0, "register stack underflow");
    self.top -= 1;
    REGS[self.top]
  }

  fn top_reg(&self) -> &'static str {
    assert!(self.top > 0, "register stack is empty");
    REGS[self.top - 1]
  }

  fn var_offset(&self, idx: usize) -> usize {
    match self.func.locals.get(idx) {
      Some(var) => var.offset,
      None => panic!("variable #{idx} is missing from the locals table"),
    }
  }

  /// Push the address of an lvalue.
  fn gen_addr(&mut self, node: &Node) -> CompileResult<()> {
    match node {
      Node::Var { idx } => {
        let offset = self.var_offset(*idx);
        let reg = self.push_reg()?;
        self.emit(format!("lea {reg}, [rbp-{offset}]"));
        Ok(())
      }
      _ => panic!("not an lvalue: {node:?}"),
    }
  }

  /// Replace the address on top of the stack with the value it points to.
  fn load(&mut self) {
    let reg = self.top_reg();
    self.emit(format!("mov {reg}, [{reg}]"));
  }

  /// Pop an address and store the value beneath it there. The value stays.
  fn store(&mut self) {
    let addr = self.pop_reg();
    let value = self.top_reg();
    self.emit(format!("mov [{addr}], {value}"));
  }

  fn gen_expr(&mut self, node: &Node) -> CompileResult<()> {
    match node {
      Node::Num { value } => {
        let reg = self.push_reg()?;
        self.emit(format!("mov {reg}, {value}"));
      }
      Node::Var { .. } => {
        self.gen_addr(node)?;
        self.load();
      }
      Node::Assign { lhs, rhs } => {
        self.gen_expr(rhs)?;
        self.gen_addr(lhs)?;
        self.store();
      }
      Node::Binary { op, lhs, rhs } => {
        self.gen_expr(lhs)?;
        self.gen_expr(rhs)?;
        let rs = self.pop_reg();
        let rd = self.top_reg();
        self.gen_binary(*op, rd, rs);
      }
      _ => panic!("not an expression: {node:?}"),
    }
    Ok(())
  }

  fn gen_binary(&mut self, op: BinaryOp, rd: &str, rs: &str) {
    let setcc = match op {
      BinaryOp::Add => return self.emit(format!("add {rd}, {rs}")),
      BinaryOp::Sub => return self.emit(format!("sub {rd}, {rs}")),
      BinaryOp::Mul => return self.emit(format!("imul {rd}, {rs}")),
      BinaryOp::Div => {
        self.emit(format!("mov rax, {rd}"));
        self.emit("cqo");
        self.emit(format!("idiv {rs}"));
        self.emit(format!("mov {rd}, rax"));
        return;
      }
      BinaryOp::Eq => "sete",
      BinaryOp::Ne => "setne",
      BinaryOp::Lt => "setl",
      BinaryOp::Le => "setle",
    };
    self.emit(format!("cmp {rd}, {rs}"));
    self.emit(format!("{setcc} al"));
    self.emit(format!("movzx {rd}, al"));
  }

  /// Pop the condition value and jump to `target` when it is zero.
  fn branch_if_zero(&mut self, target: &str) {
    let reg = self.pop_reg();
    self.emit(format!("cmp {reg}, 0"));
    self.emit(format!("je {target}"));
  }

  fn gen_stmt(&mut self, node: &Node) -> CompileResult<()> {
    match node {
      Node::Return { expr } => {
        self.gen_expr(expr)?;
        let reg = self.pop_reg();
        self.emit(format!("mov rax, {reg}"));
        self.emit("jmp .L.return");
      }
      Node::ExprStmt { expr } => {
        self.gen_expr(expr)?;
        self.pop_reg();
      }
      Node::If { cond, then, els } => {
        let seq = self.next_label_seq();
        trace!(seq, has_else = els.is_some(), "if");
        let end = format!(".L.end.{seq}");
        self.gen_expr(cond)?;
        match els {
          Some(els) => {
            let else_label = format!(".L.else.{seq}");
            self.branch_if_zero(&else_label);
            self.gen_stmt(then)?;
            self.emit(format!("jmp {end}"));
            self.label(&else_label);
            self.gen_stmt(els)?;
          }
          None => {
            self.branch_if_zero(&end);
            self.gen_stmt(then)?;
          }
        }
        self.label(&end);
      }
      Node::For {
        init,
        cond,
        inc,
        body,
      } => {
        let seq = self.next_label_seq();
        trace!(seq, "for");
        let begin = format!(".L.begin.{seq}");
        let brk = format!(".L.break.{seq}");
        if let Some(init) = init {
          self.gen_stmt(init)?;
        }
        self.label(&begin);
        if let Some(cond) = cond {
          self.gen_expr(cond)?;
          self.branch_if_zero(&brk);
        }
        self.gen_stmt(body)?;
        if let Some(inc) = inc {
          self.gen_stmt(inc)?;
        }
        self.emit(format!("jmp {begin}"));
        self.label(&brk);
      }
      _ => panic!("not a statement: {node:?}"),
    }
    Ok(())
  }
}
