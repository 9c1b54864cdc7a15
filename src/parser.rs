//! Recursive-descent parser producing a statement list and expression AST.
//!
//! Each precedence level is one helper calling the next-tighter level:
//!
//! ```text
//! program    = stmt*
//! stmt       = "return" expr ";"
//!            | "if" "(" expr ")" stmt ("else" stmt)?
//!            | "for" "(" expr? ";" expr? ";" expr? ")" stmt
//!            | expr ";"
//! expr       = assign
//! assign     = equality ("=" assign)?
//! equality   = relational ("==" relational | "!=" relational)*
//! relational = add ("<" add | "<=" add | ">" add | ">=" add)*
//! add        = mul ("+" mul | "-" mul)*
//! mul        = unary ("*" unary | "/" unary)*
//! unary      = ("+" | "-") unary | primary
//! primary    = "(" expr ")" | ident | num
//! ```
//!
//! Some sugar is removed while parsing so the code generator sees fewer
//! shapes: `a > b` becomes `b < a`, `-x` becomes `0 - x` and `+x` is just `x`.

use tracing::{debug, trace};

use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{Token, TokenKind, describe_token, token_text};

/// Binary operators the code generator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Eq,
  Ne,
  Lt,
  Le,
}

/// Syntax tree produced by the parser. Statements and expressions share one
/// type; the statement list itself lives in [`Function::body`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
  Num {
    value: i64,
  },
  /// Index into [`Function::locals`].
  Var {
    idx: usize,
  },
  Binary {
    op: BinaryOp,
    lhs: Box<Node>,
    rhs: Box<Node>,
  },
  Assign {
    lhs: Box<Node>,
    rhs: Box<Node>,
  },
  Return {
    expr: Box<Node>,
  },
  ExprStmt {
    expr: Box<Node>,
  },
  If {
    cond: Box<Node>,
    then: Box<Node>,
    els: Option<Box<Node>>,
  },
  For {
    init: Option<Box<Node>>,
    cond: Option<Box<Node>>,
    inc: Option<Box<Node>>,
    body: Box<Node>,
  },
}

impl Node {
  pub fn number(value: i64) -> Self {
    Self::Num { value }
  }

  pub fn var(idx: usize) -> Self {
    Self::Var { idx }
  }

  pub fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Self {
    Self::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  pub fn assign(lhs: Node, rhs: Node) -> Self {
    Self::Assign {
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  pub fn expr_stmt(expr: Node) -> Self {
    Self::ExprStmt {
      expr: Box::new(expr),
    }
  }
}

/// A local variable. Declared implicitly on first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
  pub name: String,
  /// Distance below `rbp`; filled in by the code generator's frame layout.
  pub offset: usize,
}

/// The single implicit function a program compiles to.
#[derive(Debug, Clone, Default)]
pub struct Function {
  pub body: Vec<Node>,
  /// Locals in declaration order. Reverse iteration yields the most recently
  /// declared variable first.
  pub locals: Vec<Var>,
  pub stack_size: usize,
}

impl Function {
  /// Look up a local by exact name.
  pub fn find_var(&self, name: &str) -> Option<usize> {
    self.locals.iter().position(|var| var.name == name)
  }
}

/// Parse a sequence of statements from the token stream.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Function> {
  let mut parser = Parser {
    stream: TokenStream::new(tokens, source),
    func: Function::default(),
  };

  while !parser.stream.is_eof() {
    let stmt = parser.stmt()?;
    parser.func.body.push(stmt);
  }

  debug!(
    statements = parser.func.body.len(),
    locals = parser.func.locals.len(),
    "parsed program"
  );
  Ok(parser.func)
}

struct Parser<'a> {
  stream: TokenStream<'a>,
  func: Function,
}

impl Parser<'_> {
  fn stmt(&mut self) -> CompileResult<Node> {
    if self.stream.equal_keyword("return") {
      let expr = self.expr()?;
      self.stream.skip(";")?;
      return Ok(Node::Return {
        expr: Box::new(expr),
      });
    }

    if self.stream.equal_keyword("if") {
      self.stream.skip("(")?;
      let cond = self.expr()?;
      self.stream.skip(")")?;
      let then = self.stmt()?;
      // Checking right after `then` binds a dangling `else` to the nearest `if`.
      let els = if self.stream.equal_keyword("else") {
        Some(Box::new(self.stmt()?))
      } else {
        None
      };
      return Ok(Node::If {
        cond: Box::new(cond),
        then: Box::new(then),
        els,
      });
    }

    if self.stream.equal_keyword("for") {
      self.stream.skip("(")?;
      let init = self.optional_expr(";")?.map(|e| Box::new(Node::expr_stmt(e)));
      self.stream.skip(";")?;
      let cond = self.optional_expr(";")?.map(Box::new);
      self.stream.skip(";")?;
      let inc = self.optional_expr(")")?.map(|e| Box::new(Node::expr_stmt(e)));
      self.stream.skip(")")?;
      let body = self.stmt()?;
      return Ok(Node::For {
        init,
        cond,
        inc,
        body: Box::new(body),
      });
    }

    let expr = self.expr()?;
    self.stream.skip(";")?;
    Ok(Node::expr_stmt(expr))
  }

  /// Parse an expression unless the next token is `terminator`.
  fn optional_expr(&mut self, terminator: &str) -> CompileResult<Option<Node>> {
    if self.stream.is_punct(terminator) {
      Ok(None)
    } else {
      self.expr().map(Some)
    }
  }

  fn expr(&mut self) -> CompileResult<Node> {
    self.assign()
  }

  fn assign(&mut self) -> CompileResult<Node> {
    let node = self.equality()?;

    let loc = self.stream.loc();
    if self.stream.equal("=") {
      if !matches!(node, Node::Var { .. }) {
        return Err(CompileError::at(self.stream.source, loc, "not an lvalue"));
      }
      let rhs = self.assign()?;
      return Ok(Node::assign(node, rhs));
    }

    Ok(node)
  }

  fn equality(&mut self) -> CompileResult<Node> {
    let mut node = self.relational()?;

    loop {
      if self.stream.equal("==") {
        let rhs = self.relational()?;
        node = Node::binary(BinaryOp::Eq, node, rhs);
        continue;
      }

      if self.stream.equal("!=") {
        let rhs = self.relational()?;
        node = Node::binary(BinaryOp::Ne, node, rhs);
        continue;
      }

      return Ok(node);
    }
  }

  fn relational(&mut self) -> CompileResult<Node> {
    let mut node = self.add()?;

    loop {
      if self.stream.equal("<") {
        let rhs = self.add()?;
        node = Node::binary(BinaryOp::Lt, node, rhs);
        continue;
      }

      if self.stream.equal("<=") {
        let rhs = self.add()?;
        node = Node::binary(BinaryOp::Le, node, rhs);
        continue;
      }

      if self.stream.equal(">") {
        let rhs = self.add()?;
        node = Node::binary(BinaryOp::Lt, rhs, node);
        continue;
      }

      if self.stream.equal(">=") {
        let rhs = self.add()?;
        node = Node::binary(BinaryOp::Le, rhs, node);
        continue;
      }

      return Ok(node);
    }
  }

  fn add(&mut self) -> CompileResult<Node> {
    let mut node = self.mul()?;

    loop {
      if self.stream.equal("+") {
        let rhs = self.mul()?;
        node = Node::binary(BinaryOp::Add, node, rhs);
        continue;
      }

      if self.stream.equal("-") {
        let rhs = self.mul()?;
        node = Node::binary(BinaryOp::Sub, node, rhs);
        continue;
      }

      return Ok(node);
    }
  }

  fn mul(&mut self) -> CompileResult<Node> {
    let mut node = self.unary()?;

    loop {
      if self.stream.equal("*") {
        let rhs = self.unary()?;
        node = Node::binary(BinaryOp::Mul, node, rhs);
        continue;
      }

      if self.stream.equal("/") {
        let rhs = self.unary()?;
        node = Node::binary(BinaryOp::Div, node, rhs);
        continue;
      }

      return Ok(node);
    }
  }

  fn unary(&mut self) -> CompileResult<Node> {
    if self.stream.equal("+") {
      return self.unary();
    }

    if self.stream.equal("-") {
      let operand = self.unary()?;
      return Ok(Node::binary(BinaryOp::Sub, Node::number(0), operand));
    }

    self.primary()
  }

  fn primary(&mut self) -> CompileResult<Node> {
    if self.stream.equal("(") {
      let node = self.expr()?;
      self.stream.skip(")")?;
      return Ok(node);
    }

    if let Some(name) = self.stream.get_ident() {
      let idx = match self.func.find_var(name) {
        Some(idx) => idx,
        None => {
          trace!(var = name, "declaring local");
          self.func.locals.push(Var {
            name: name.to_string(),
            offset: 0,
          });
          self.func.locals.len() - 1
        }
      };
      return Ok(Node::var(idx));
    }

    let value = self.stream.get_number()?;
    Ok(Node::number(value))
  }
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  /// Byte offset of the current token, or end of input.
  fn loc(&self) -> usize {
    self.peek().map_or(self.source.len(), |token| token.loc)
  }

  fn is_punct(&self, op: &str) -> bool {
    self.peek().is_some_and(|token| {
      token.kind == TokenKind::Punctuator && token_text(token, self.source) == op
    })
  }

  /// Consume the current token if it matches the provided punctuator.
  fn equal(&mut self, op: &str) -> bool {
    if self.is_punct(op) {
      self.pos += 1;
      return true;
    }
    false
  }

  /// Consume the current token if it is the given keyword.
  fn equal_keyword(&mut self, keyword: &str) -> bool {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Keyword
      && token_text(token, self.source) == keyword
    {
      self.pos += 1;
      return true;
    }
    false
  }

  fn skip(&mut self, s: &str) -> CompileResult<()> {
    if self.equal(s) {
      Ok(())
    } else {
      let got = describe_token(self.peek(), self.source);
      Err(CompileError::at(
        self.source,
        self.loc(),
        format!("expected \"{s}\", but got \"{got}\""),
      ))
    }
  }

  /// Parse the current token as an integer literal.
  fn get_number(&mut self) -> CompileResult<i64> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Num
      && let Some(value) = token.value
    {
      self.pos += 1;
      return Ok(value);
    }

    let got = describe_token(self.peek(), self.source);
    Err(CompileError::at(
      self.source,
      self.loc(),
      format!("expected an expression, but got \"{got}\""),
    ))
  }

  /// Consume the current token if it is an identifier, returning its text.
  fn get_ident(&mut self) -> Option<&'a str> {
    let token = self.peek()?;
    if token.kind != TokenKind::Ident {
      return None;
    }
    let name = token_text(token, self.source);
    self.pos += 1;
    Some(name)
  }

  fn is_eof(&self) -> bool {
    matches!(self.peek().map(|token| token.kind), Some(TokenKind::Eof) | None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tokenizer::tokenize;

  fn parse_src(source: &str) -> CompileResult<Function> {
    parse(tokenize(source)?, source)
  }

  /// Parse `source` as a single expression statement and return the expression.
  fn expr(source: &str) -> Node {
    let func = parse_src(&format!("{source};")).unwrap();
    assert_eq!(func.body.len(), 1);
    match func.body.into_iter().next().unwrap() {
      Node::ExprStmt { expr } => *expr,
      other => panic!("expected expression statement, got {other:?}"),
    }
  }

  fn num(value: i64) -> Node {
    Node::number(value)
  }

  fn bin(op: BinaryOp, lhs: Node, rhs: Node) -> Node {
    Node::binary(op, lhs, rhs)
  }

  #[test]
  fn multiplication_binds_tighter() {
    assert_eq!(
      expr("2 + 3 * 4"),
      bin(BinaryOp::Add, num(2), bin(BinaryOp::Mul, num(3), num(4)))
    );
    assert_eq!(
      expr("(2 + 3) * 4"),
      bin(BinaryOp::Mul, bin(BinaryOp::Add, num(2), num(3)), num(4))
    );
  }

  #[test]
  fn subtraction_is_left_associative() {
    assert_eq!(
      expr("10 - 2 - 3"),
      bin(BinaryOp::Sub, bin(BinaryOp::Sub, num(10), num(2)), num(3))
    );
  }

  #[test]
  fn assignment_is_right_associative() {
    let func = parse_src("a = b = 5;").unwrap();
    assert_eq!(func.locals.len(), 2);
    assert_eq!(
      func.body,
      vec![Node::expr_stmt(Node::assign(
        Node::var(0),
        Node::assign(Node::var(1), num(5))
      ))]
    );
  }

  #[test]
  fn unary_operators_are_rewritten() {
    assert_eq!(expr("+7"), num(7));
    assert_eq!(expr("-5"), bin(BinaryOp::Sub, num(0), num(5)));
    assert_eq!(
      expr("- -5"),
      bin(BinaryOp::Sub, num(0), bin(BinaryOp::Sub, num(0), num(5)))
    );
  }

  #[test]
  fn greater_than_swaps_operands() {
    assert_eq!(expr("1 > 2"), bin(BinaryOp::Lt, num(2), num(1)));
    assert_eq!(expr("1 >= 2"), bin(BinaryOp::Le, num(2), num(1)));
    assert_eq!(expr("1 < 2"), bin(BinaryOp::Lt, num(1), num(2)));
  }

  #[test]
  fn equality_is_looser_than_relational() {
    assert_eq!(
      expr("1 < 2 == 3 <= 4"),
      bin(
        BinaryOp::Eq,
        bin(BinaryOp::Lt, num(1), num(2)),
        bin(BinaryOp::Le, num(3), num(4))
      )
    );
  }

  #[test]
  fn identifiers_resolve_to_one_slot() {
    let func = parse_src("foo = 1; bar = foo + 2; foo = bar;").unwrap();
    let names: Vec<_> = func.locals.iter().map(|var| var.name.as_str()).collect();
    assert_eq!(names, ["foo", "bar"]);
    assert_eq!(func.find_var("foo"), Some(0));
    assert_eq!(func.find_var("bar"), Some(1));
    assert_eq!(func.find_var("baz"), None);
    assert_eq!(
      func.body[2],
      Node::expr_stmt(Node::assign(Node::var(0), Node::var(1)))
    );
  }

  #[test]
  fn dangling_else_binds_to_nearest_if() {
    let func = parse_src("if (1) if (2) return 3; else return 4;").unwrap();
    let Node::If { then, els, .. } = &func.body[0] else {
      panic!("expected if");
    };
    assert!(els.is_none());
    assert!(matches!(**then, Node::If { els: Some(_), .. }));
  }

  #[test]
  fn for_clauses_are_optional() {
    let func = parse_src("for (;;) return 1;").unwrap();
    assert_eq!(
      func.body,
      vec![Node::For {
        init: None,
        cond: None,
        inc: None,
        body: Box::new(Node::Return {
          expr: Box::new(num(1))
        }),
      }]
    );

    let func = parse_src("for (i = 0; i < 10; i = i + 1) s = s + i;").unwrap();
    let Node::For { init, cond, inc, .. } = &func.body[0] else {
      panic!("expected for");
    };
    assert!(matches!(init.as_deref(), Some(Node::ExprStmt { .. })));
    assert!(matches!(cond.as_deref(), Some(Node::Binary { op: BinaryOp::Lt, .. })));
    assert!(matches!(inc.as_deref(), Some(Node::ExprStmt { .. })));
  }

  #[test]
  fn empty_program_has_no_statements() {
    let func = parse_src("").unwrap();
    assert!(func.body.is_empty());
    assert!(func.locals.is_empty());
  }

  #[test]
  fn missing_operand_is_reported_at_eof() {
    let err = parse_src("1 +").unwrap_err();
    assert_eq!(
      err.to_string(),
      "1 +\n   ^ expected an expression, but got \"EOF\""
    );
  }

  #[test]
  fn missing_semicolon() {
    let err = parse_src("return 1").unwrap_err();
    assert_eq!(
      err.to_string(),
      "return 1\n        ^ expected \";\", but got \"EOF\""
    );
  }

  #[test]
  fn unmatched_paren() {
    let err = parse_src("(1 + 2;").unwrap_err();
    assert_eq!(
      err.to_string(),
      "(1 + 2;\n      ^ expected \")\", but got \";\""
    );
  }

  #[test]
  fn assignment_needs_a_variable() {
    let err = parse_src("1 = 2;").unwrap_err();
    assert_eq!(err.to_string(), "1 = 2;\n  ^ not an lvalue");
  }

  #[test]
  fn keywords_are_not_variables() {
    let err = parse_src("else = 1;").unwrap_err();
    assert_eq!(
      err.to_string(),
      "else = 1;\n^ expected an expression, but got \"else\""
    );
  }
}
