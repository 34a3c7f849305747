use tracing::debug;

use crate::Compilation;
use crate::bytecode::{Code, Op, Operand, OperandKind, Relop};
use crate::diagnostic::{Diagnostic, Diagnostics};
use crate::lexer::{LexIssue, Lexer};
use crate::options::CompileOptions;
use crate::symtab::{Builtin, EntityKind, MethodInfo, ObjId, ObjKind, SymbolTable, Type};
use crate::token::{Token, TokenKind};

/// Frame slots addressable by `enter` and `load`/`store`.
const MAX_LOCALS: usize = 255;

/// Single-pass recursive-descent compiler.
///
/// Each `parse_*` method recognizes one grammar rule and, while doing so,
/// declares or resolves names, checks types and emits code. There is no
/// syntax tree: once a rule returns, its code is in the buffer.
///
/// Errors never abort the parse. A failed lookup or type check yields the
/// error sentinel (`Type::Error`, `OperandKind::Error`) that every later
/// check accepts, so one mistake is reported once.
pub struct Parser {
    lexer: Lexer,
    /// Most recently consumed token.
    t: Token,
    /// Lookahead token.
    la: Token,
    tab: SymbolTable,
    code: Code,
    diags: Diagnostics,
    /// Declared return type of the method being compiled.
    method_ty: Type,
    strict_literals: bool,
}

impl Parser {
    pub fn new(source: &str, options: &CompileOptions) -> Self {
        Parser {
            lexer: Lexer::new(source),
            t: Token::default(),
            la: Token::default(),
            tab: SymbolTable::new(),
            code: Code::new(),
            diags: Diagnostics::new(options.error_distance),
            method_ty: Type::None,
            strict_literals: options.strict_literals,
        }
    }

    /// Compiles the whole source text.
    pub fn parse(mut self) -> Compilation {
        self.scan();
        let data_size = self.parse_program();
        if self.sym() != TokenKind::Eof {
            self.error("end of file found before end of program");
        }

        let too_large = self.code.overflowed() || u16::try_from(data_size).is_err();
        if too_large && self.diags.error_count() == 0 {
            let diagnostic = Diagnostic::new("program too large", self.la.line, self.la.col);
            self.diags.error_unthrottled(diagnostic);
        }

        let object = self.code.dump(data_size);
        let (errors, warnings) = self.diags.into_parts();
        Compilation::new(object, errors, warnings)
    }

    // =========================================================================
    // Token plumbing
    // =========================================================================

    fn sym(&self) -> TokenKind {
        self.la.kind
    }

    fn scan(&mut self) {
        let next = self.lexer.next();
        self.t = std::mem::replace(&mut self.la, next);
        self.diags.token_consumed();

        for found in self.lexer.take_issues() {
            let diagnostic = Diagnostic::new(found.issue.to_string(), found.line, found.col);
            match found.issue {
                LexIssue::NumberOverflow if !self.strict_literals => {
                    self.diags.warning(diagnostic)
                }
                _ => self.diags.error_unthrottled(diagnostic),
            }
        }
    }

    /// Consumes the lookahead if it is `expected`, otherwise reports
    /// "`expected` expected" and leaves it in place.
    fn check(&mut self, expected: TokenKind) {
        if self.sym() == expected {
            self.scan();
        } else {
            self.error(format!("{} expected", expected.name()));
        }
    }

    /// Reports an error at the lookahead token.
    fn error(&mut self, message: impl Into<String>) {
        let (line, col) = (self.la.line, self.la.col);
        self.diags.error(message, line, col);
    }

    fn ident(&mut self) -> Option<String> {
        if self.sym() == TokenKind::Ident {
            self.scan();
            Some(self.t.text.clone())
        } else {
            self.check(TokenKind::Ident);
            None
        }
    }

    // =========================================================================
    // Symbol table glue
    // =========================================================================

    fn declare(&mut self, kind: EntityKind, name: &str, ty: Type) -> ObjId {
        match self.tab.insert(kind, name, ty) {
            Ok(id) => id,
            Err(e) => {
                self.error(e.to_string());
                self.tab.error_obj()
            }
        }
    }

    fn resolve(&mut self, name: &str) -> ObjId {
        match self.tab.find(name) {
            Ok(id) => id,
            Err(e) => {
                self.error(e.to_string());
                self.tab.error_obj()
            }
        }
    }

    /// The type named by `id`; `None` if `id` is not a type at all.
    fn type_named_by(&self, id: ObjId) -> Option<Type> {
        let obj = self.tab.obj(id);
        match obj.kind {
            ObjKind::Type => Some(obj.ty.clone()),
            ObjKind::Error => Some(Type::Error),
            _ => None,
        }
    }

    fn operand_for(&mut self, id: ObjId) -> Operand {
        let obj = self.tab.obj(id);
        let ty = obj.ty.clone();
        let kind = match obj.kind {
            ObjKind::Const(val) => OperandKind::Const(val),
            ObjKind::Var { adr, level: 0 } => OperandKind::Static(adr),
            ObjKind::Var { adr, .. } => OperandKind::Local(adr),
            ObjKind::Method(_) => OperandKind::Method(id),
            ObjKind::Error => return Operand::error(),
            ObjKind::Type | ObjKind::Program => {
                self.error("identifier does not denote a value");
                return Operand::error();
            }
        };
        Operand::new(kind, ty)
    }

    fn load(&mut self, x: &mut Operand) {
        if let Err(e) = self.code.load(x) {
            self.error(e.to_string());
            *x = Operand::error();
        }
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    /// `"program" ident {ConstDecl | ClassDecl | VarDecl} "{" {MethodDecl} "}"`
    ///
    /// Returns the number of global variables.
    fn parse_program(&mut self) -> usize {
        self.check(TokenKind::Program);
        if let Some(name) = self.ident() {
            self.declare(EntityKind::Program, &name, Type::None);
        }
        self.tab.open_scope();

        loop {
            match self.sym() {
                TokenKind::Final => self.parse_const_decl(),
                TokenKind::Class => self.parse_class_decl(),
                TokenKind::Ident => self.parse_var_decl(),
                TokenKind::LBrace | TokenKind::Eof => break,
                _ => {
                    self.error("invalid start of Declaration");
                    loop {
                        self.scan();
                        if matches!(
                            self.sym(),
                            TokenKind::Final
                                | TokenKind::Class
                                | TokenKind::LBrace
                                | TokenKind::Semicolon
                                | TokenKind::Eof
                        ) {
                            break;
                        }
                    }
                    if self.sym() == TokenKind::Semicolon {
                        self.scan();
                    }
                    self.diags.resync();
                }
            }
        }

        self.check(TokenKind::LBrace);
        while matches!(self.sym(), TokenKind::Ident | TokenKind::Void) {
            self.parse_method_decl();
        }
        self.check(TokenKind::RBrace);

        if self.code.main_pc().is_none() {
            self.error("method main not found");
        }

        let data_size = self.tab.cur_scope().n_vars();
        self.tab.close_scope();
        data_size
    }

    /// `"final" Type ident "=" (number | charConst) ";"`
    fn parse_const_decl(&mut self) {
        self.check(TokenKind::Final);
        let ty = self.parse_type();
        let id = match self.ident() {
            Some(name) => self.declare(EntityKind::Const, &name, ty.clone()),
            None => self.tab.error_obj(),
        };
        self.check(TokenKind::Assign);

        let value = match self.sym() {
            TokenKind::Number | TokenKind::CharConst => {
                let literal_ty = if self.sym() == TokenKind::Number {
                    Type::Int
                } else {
                    Type::Char
                };
                if !literal_ty.assignable_to(&ty) {
                    let message = match ty {
                        Type::Int => "integer constant expected",
                        Type::Char => "char constant expected",
                        _ => "constants must be of type int or char",
                    };
                    self.error(message);
                }
                self.scan();
                Some(self.t.val)
            }
            _ => {
                self.error("constant value expected");
                None
            }
        };

        if let (Some(val), ObjKind::Const(slot)) = (value, &mut self.tab.obj_mut(id).kind) {
            *slot = val;
        }
        self.check(TokenKind::Semicolon);
    }

    /// `"class" ident "{" {VarDecl} "}"`
    fn parse_class_decl(&mut self) {
        self.check(TokenKind::Class);
        let name = self.ident();
        let class = self.tab.new_class(name.as_deref().unwrap_or("???"));
        if let Some(name) = &name {
            self.declare(EntityKind::Type, name, Type::Class(class));
        }

        self.tab.open_scope();
        self.check(TokenKind::LBrace);
        while self.sym() == TokenKind::Ident {
            self.parse_var_decl();
        }
        let fields = self.tab.cur_scope().locals().to_vec();
        self.tab.set_class_fields(class, fields);
        self.check(TokenKind::RBrace);
        self.tab.close_scope();
    }

    /// `Type ident {"," ident} ";"`
    fn parse_var_decl(&mut self) {
        let ty = self.parse_type();
        loop {
            if let Some(name) = self.ident() {
                self.declare(EntityKind::Var, &name, ty.clone());
            }
            if self.sym() != TokenKind::Comma {
                break;
            }
            self.scan();
        }
        self.check(TokenKind::Semicolon);
    }

    /// `ident ["[" "]"]`
    fn parse_type(&mut self) -> Type {
        let Some(name) = self.ident() else {
            return Type::Error;
        };
        let id = self.resolve(&name);
        let mut ty = match self.type_named_by(id) {
            Some(ty) => ty,
            None => {
                self.error("type expected");
                Type::Error
            }
        };

        if self.sym() == TokenKind::LBrack {
            self.scan();
            self.check(TokenKind::RBrack);
            ty = Type::array_of(ty);
        }
        ty
    }

    /// `(Type | "void") ident "(" [FormPars] ")" {VarDecl} Block`
    fn parse_method_decl(&mut self) {
        let ret = if self.sym() == TokenKind::Void {
            self.scan();
            Type::None
        } else {
            self.parse_type()
        };

        let name = self.ident();
        let method = match &name {
            Some(name) => self.declare(EntityKind::Method, name, ret.clone()),
            None => self.tab.error_obj(),
        };
        let is_main = name.as_deref() == Some("main");
        self.method_ty = ret.clone();

        self.tab.open_scope();
        self.check(TokenKind::LPar);
        if self.sym() == TokenKind::Ident {
            self.parse_form_pars();
        }
        let n_pars = self.tab.cur_scope().n_vars();
        if is_main {
            if ret != Type::None {
                self.error("main method must be void");
            }
            if n_pars != 0 {
                self.error("main method must not have parameters");
            }
        }
        self.check(TokenKind::RPar);

        while self.sym() == TokenKind::Ident {
            self.parse_var_decl();
        }

        let frame_size = self.tab.cur_scope().n_vars();
        if frame_size > MAX_LOCALS {
            self.error("too many local variables");
        }
        let locals = self.tab.cur_scope().locals().to_vec();
        let adr = self.code.enter(n_pars, frame_size);
        if let Some(info) = self.tab.obj_mut(method).method_mut() {
            info.n_pars = n_pars;
            info.locals = locals;
            info.adr = adr;
        }
        if is_main {
            self.code.set_main_pc(adr);
        }
        debug!(
            method = name.as_deref().unwrap_or("???"),
            adr, n_pars, frame_size, "method entry"
        );

        self.parse_block();

        if ret == Type::None {
            self.code.exit_and_return();
        } else {
            self.code.missing_return_trap();
        }
        self.tab.close_scope();
        self.method_ty = Type::None;
    }

    /// `Type ident {"," Type ident}`
    fn parse_form_pars(&mut self) {
        loop {
            let ty = self.parse_type();
            if let Some(name) = self.ident() {
                self.declare(EntityKind::Var, &name, ty);
            }
            if self.sym() != TokenKind::Comma {
                break;
            }
            self.scan();
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// `"{" {Statement} "}"`
    fn parse_block(&mut self) {
        self.check(TokenKind::LBrace);
        while !matches!(self.sym(), TokenKind::RBrace | TokenKind::Eof) {
            self.parse_statement();
        }
        self.check(TokenKind::RBrace);
    }

    fn parse_statement(&mut self) {
        if !self.sym().starts_statement() {
            self.error("invalid start of statement");
            loop {
                self.scan();
                let sym = self.sym();
                if sym.starts_statement() || matches!(sym, TokenKind::RBrace | TokenKind::Eof) {
                    break;
                }
            }
            if self.sym() == TokenKind::Semicolon {
                self.scan();
            }
            self.diags.resync();
        }

        match self.sym() {
            TokenKind::Ident => self.parse_designator_statement(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Read => self.parse_read(),
            TokenKind::Print => self.parse_print(),
            TokenKind::LBrace => self.parse_block(),
            TokenKind::Semicolon => self.scan(),
            _ => {}
        }
    }

    /// `Designator ("=" Expr | ActPars) ";"`
    fn parse_designator_statement(&mut self) {
        let x = self.parse_designator();
        match self.sym() {
            TokenKind::Assign => {
                self.scan();
                let mut y = self.parse_expr();
                if y.ty.assignable_to(&x.ty) {
                    if let Err(e) = self.code.assign(&x, &mut y) {
                        self.error(e.to_string());
                    }
                } else {
                    self.error("incompatible types in assignment");
                }
            }
            TokenKind::LPar => {
                let result = self.parse_call(x);
                if result.kind == OperandKind::Stack && result.ty != Type::None {
                    self.code.emit(Op::Pop);
                }
            }
            _ => self.error("assignment or method call expected"),
        }
        self.check(TokenKind::Semicolon);
    }

    /// `"if" "(" Condition ")" Statement ["else" Statement]`
    fn parse_if(&mut self) {
        self.scan();
        self.check(TokenKind::LPar);
        let op = self.parse_condition();
        let false_jump = self.code.put_false_jump(op);
        self.check(TokenKind::RPar);
        self.parse_statement();

        if self.sym() == TokenKind::Else {
            self.scan();
            let end_jump = self.code.put_jump(0);
            self.code.fixup(false_jump);
            self.parse_statement();
            self.code.fixup(end_jump);
        } else {
            self.code.fixup(false_jump);
        }
    }

    /// `"while" "(" Condition ")" Statement`
    fn parse_while(&mut self) {
        self.scan();
        let top = self.code.pc();
        self.check(TokenKind::LPar);
        let op = self.parse_condition();
        let exit_jump = self.code.put_false_jump(op);
        self.check(TokenKind::RPar);
        self.parse_statement();
        self.code.put_jump(top);
        self.code.fixup(exit_jump);
    }

    /// `"return" [Expr] ";"`
    fn parse_return(&mut self) {
        self.scan();
        if self.sym().starts_expr() {
            let mut x = self.parse_expr();
            self.load(&mut x);
            if self.method_ty == Type::None {
                self.error("void method must not return a value");
            } else if !x.ty.assignable_to(&self.method_ty) {
                self.error("return type must match method type");
            }
        } else if self.method_ty != Type::None {
            self.error("return expression expected");
        }
        self.code.exit_and_return();
        self.check(TokenKind::Semicolon);
    }

    /// `"read" "(" Designator ")" ";"`
    fn parse_read(&mut self) {
        self.scan();
        self.check(TokenKind::LPar);
        let x = self.parse_designator();
        let op = match x.ty {
            Type::Int => Some(Op::Read),
            Type::Char => Some(Op::BRead),
            Type::Error => None,
            _ => {
                self.error("can only read int or char variables");
                None
            }
        };
        if let Some(op) = op {
            self.code.emit(op);
            if let Err(e) = self.code.store(&x) {
                self.error(e.to_string());
            }
        }
        self.check(TokenKind::RPar);
        self.check(TokenKind::Semicolon);
    }

    /// `"print" "(" Expr ["," number] ")" ";"`
    fn parse_print(&mut self) {
        self.scan();
        self.check(TokenKind::LPar);
        let mut x = self.parse_expr();
        let op = match x.ty {
            Type::Int => Some(Op::Print),
            Type::Char => Some(Op::BPrint),
            Type::Error => None,
            _ => {
                self.error("can only print int or char values");
                None
            }
        };

        let mut width = 0;
        if self.sym() == TokenKind::Comma {
            self.scan();
            if self.sym() == TokenKind::Number {
                self.scan();
                width = self.t.val;
            } else {
                self.check(TokenKind::Number);
            }
        }

        if let Some(op) = op {
            self.load(&mut x);
            self.code.emit(Op::Const(width));
            self.code.emit(op);
        }
        self.check(TokenKind::RPar);
        self.check(TokenKind::Semicolon);
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Parses `ActPars` for a call of `x` and emits the call.
    ///
    /// Returns the result on the stack, or the error operand when `x` is not
    /// a method.
    fn parse_call(&mut self, x: Operand) -> Operand {
        self.check(TokenKind::LPar);
        let info: Option<MethodInfo> = match x.kind {
            OperandKind::Method(id) => self.tab.obj(id).method().cloned(),
            _ => None,
        };
        if info.is_none() && x.kind != OperandKind::Error {
            self.error("called object is not a method");
        }

        self.parse_act_pars(info.as_ref());

        let Some(info) = info else {
            return Operand::error();
        };
        match info.builtin {
            Some(Builtin::Ord) | Some(Builtin::Chr) => {}
            Some(Builtin::Len) => {
                self.code.emit(Op::ArrayLength);
            }
            None => {
                self.code.emit(Op::Call(info.adr));
            }
        }
        Operand::on_stack(x.ty)
    }

    /// `[Expr {"," Expr}] ")"`, matched positionally against `info`'s
    /// formal parameters.
    fn parse_act_pars(&mut self, info: Option<&MethodInfo>) {
        let formals: Vec<Type> = info
            .map(|info| {
                info.locals
                    .iter()
                    .take(info.n_pars)
                    .map(|id| self.tab.obj(*id).ty.clone())
                    .collect()
            })
            .unwrap_or_default();

        let mut n_actual = 0;
        if self.sym().starts_expr() {
            loop {
                let mut ap = self.parse_expr();
                self.load(&mut ap);
                if let Some(formal) = formals.get(n_actual) {
                    if !ap.ty.assignable_to(formal) {
                        self.error("parameter type mismatch");
                    }
                }
                n_actual += 1;
                if self.sym() != TokenKind::Comma {
                    break;
                }
                self.scan();
            }
        }

        if let Some(info) = info {
            if n_actual > info.n_pars {
                self.error("more actual than formal parameters");
            } else if n_actual < info.n_pars {
                self.error("fewer actual than formal parameters");
            }
        }
        self.check(TokenKind::RPar);
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// `Expr Relop Expr`
    fn parse_condition(&mut self) -> Relop {
        let mut x = self.parse_expr();
        self.load(&mut x);
        let op = self.parse_relop();
        let mut y = self.parse_expr();
        self.load(&mut y);

        if !x.ty.compatible_with(&y.ty) {
            self.error("type mismatch");
        } else if (x.ty.is_ref_type() || y.ty.is_ref_type()) && !op.is_equality() {
            self.error("invalid compare");
        }
        op
    }

    fn parse_relop(&mut self) -> Relop {
        let op = match self.sym() {
            TokenKind::Eql => Relop::Eq,
            TokenKind::Neq => Relop::Ne,
            TokenKind::Lss => Relop::Lt,
            TokenKind::Leq => Relop::Le,
            TokenKind::Gtr => Relop::Gt,
            TokenKind::Geq => Relop::Ge,
            _ => {
                self.error("relational operator expected");
                return Relop::Eq;
            }
        };
        self.scan();
        op
    }

    /// `["-"] Term {("+" | "-") Term}`
    fn parse_expr(&mut self) -> Operand {
        let mut x = if self.sym() == TokenKind::Minus {
            self.scan();
            let mut x = self.parse_term();
            if !is_int(&x.ty) {
                self.error("integer operand required");
                Operand::error()
            } else if let OperandKind::Const(val) = x.kind {
                Operand::constant(val.wrapping_neg(), x.ty)
            } else {
                self.load(&mut x);
                self.code.emit(Op::Neg);
                Operand::on_stack(x.ty)
            }
        } else {
            self.parse_term()
        };

        loop {
            let op = match self.sym() {
                TokenKind::Plus => Op::Add,
                TokenKind::Minus => Op::Sub,
                _ => break,
            };
            self.scan();
            self.load(&mut x);
            let mut y = self.parse_term();
            self.load(&mut y);
            x = self.arith(op, &x, &y);
        }
        x
    }

    /// `Factor {("*" | "/" | "%") Factor}`
    fn parse_term(&mut self) -> Operand {
        let mut x = self.parse_factor();
        loop {
            let op = match self.sym() {
                TokenKind::Times => Op::Mul,
                TokenKind::Slash => Op::Div,
                TokenKind::Rem => Op::Rem,
                _ => break,
            };
            self.scan();
            self.load(&mut x);
            let mut y = self.parse_factor();
            self.load(&mut y);
            x = self.arith(op, &x, &y);
        }
        x
    }

    /// Emits a binary arithmetic op over two loaded operands.
    fn arith(&mut self, op: Op, x: &Operand, y: &Operand) -> Operand {
        if !is_int(&x.ty) || !is_int(&y.ty) {
            self.error("operands must be of type int");
            return Operand::error();
        }
        self.code.emit(op);
        Operand::on_stack(Type::Int)
    }

    /// ```text
    /// Designator [ActPars] | number | charConst
    ///   | "new" ident ["[" Expr "]"] | "(" Expr ")"
    /// ```
    fn parse_factor(&mut self) -> Operand {
        match self.sym() {
            TokenKind::Ident => {
                let x = self.parse_designator();
                if self.sym() != TokenKind::LPar {
                    return x;
                }
                let result = self.parse_call(x);
                if result.ty == Type::None {
                    self.error("procedure called as a function");
                    return Operand::error();
                }
                result
            }
            TokenKind::Number => {
                self.scan();
                Operand::constant(self.t.val, Type::Int)
            }
            TokenKind::CharConst => {
                self.scan();
                Operand::constant(self.t.val, Type::Char)
            }
            TokenKind::New => self.parse_new(),
            TokenKind::LPar => {
                self.scan();
                let x = self.parse_expr();
                self.check(TokenKind::RPar);
                x
            }
            _ => {
                self.error("invalid start of factor");
                Operand::error()
            }
        }
    }

    /// `"new" ident ["[" Expr "]"]`
    fn parse_new(&mut self) -> Operand {
        self.scan();
        let Some(name) = self.ident() else {
            return Operand::error();
        };
        let id = self.resolve(&name);
        let named = self.type_named_by(id);

        if self.sym() == TokenKind::LBrack {
            self.scan();
            if named.is_none() {
                self.error("type expected");
            }
            let mut size = self.parse_expr();
            if !is_int(&size.ty) {
                self.error("array size must be an integer");
            }
            self.load(&mut size);
            self.check(TokenKind::RBrack);

            let elem = named.unwrap_or(Type::Error);
            self.code.new_array(&elem);
            return Operand::on_stack(Type::array_of(elem));
        }

        match named {
            Some(Type::Class(class)) => {
                let n_fields = self.tab.class(class).n_fields();
                self.code.new_object(n_fields);
                Operand::on_stack(Type::Class(class))
            }
            Some(Type::Error) => Operand::error(),
            _ => {
                self.error("class type expected");
                Operand::error()
            }
        }
    }

    /// `ident {"." ident | "[" Expr "]"}`
    ///
    /// Each selector first loads the designator built so far, so on return
    /// a field or element operand finds its base (and index) on the stack.
    fn parse_designator(&mut self) -> Operand {
        let Some(name) = self.ident() else {
            return Operand::error();
        };
        let id = self.resolve(&name);
        let mut x = self.operand_for(id);

        loop {
            match self.sym() {
                TokenKind::Period => {
                    self.load(&mut x);
                    self.scan();
                    let field = self.ident();
                    x = self.select_field(&x.ty, field);
                }
                TokenKind::LBrack => {
                    self.load(&mut x);
                    self.scan();
                    let mut index = self.parse_expr();
                    self.check(TokenKind::RBrack);
                    x = match x.ty.elem_type().cloned() {
                        Some(elem) => {
                            if !is_int(&index.ty) {
                                self.error("index must be an int");
                            }
                            self.load(&mut index);
                            Operand::new(OperandKind::Elem, elem)
                        }
                        None if x.ty.is_error() => Operand::error(),
                        None => {
                            self.error("indexed object is not an array");
                            Operand::error()
                        }
                    };
                }
                _ => return x,
            }
        }
    }

    fn select_field(&mut self, base: &Type, field: Option<String>) -> Operand {
        let class = match base {
            Type::Class(class) => *class,
            Type::Error => return Operand::error(),
            _ => {
                self.error("dereferenced object is not a class");
                return Operand::error();
            }
        };
        let Some(field) = field else {
            return Operand::error();
        };

        match self.tab.find_field(&field, class) {
            Ok(id) => {
                let obj = self.tab.obj(id);
                match obj.kind {
                    ObjKind::Var { adr, .. } => Operand::new(OperandKind::Field(adr), obj.ty.clone()),
                    _ => Operand::error(),
                }
            }
            Err(e) => {
                self.error(e.to_string());
                Operand::error()
            }
        }
    }
}

/// Int, or the error sentinel that stands in for anything.
fn is_int(ty: &Type) -> bool {
    matches!(ty, Type::Int | Type::Error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::decode_all;
    use crate::compile;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn messages(source: &str) -> Vec<String> {
        compile(source)
            .errors()
            .iter()
            .map(|d| d.message.clone())
            .collect()
    }

    fn ops(source: &str) -> Vec<Op> {
        let compilation = compile(source);
        assert_eq!(compilation.errors(), &[]);
        let object = compilation.object().unwrap();
        decode_all(&object.code)
            .unwrap()
            .into_iter()
            .map(|(_, op)| op)
            .collect()
    }

    /// Wraps `body` in a program with globals `int a; char c; int[] arr;`.
    fn in_main(body: &str) -> String {
        format!(
            "program P int a; char c; int[] arr; {{ void main() int i; {{ {} }} }}",
            body
        )
    }

    #[test]
    fn test_minimal_program() {
        let compilation = compile("program P { void main() { } }");
        assert!(compilation.is_ok());
        let object = compilation.object().unwrap();
        assert_eq!(object.main_pc, 0);
        assert_eq!(object.data_size, 0);
        assert_eq!(
            ops("program P { void main() { } }"),
            vec![Op::Enter { params: 0, locals: 0 }, Op::Exit, Op::Return]
        );
    }

    #[test]
    fn test_globals_size_data_area() {
        let compilation = compile("program P int a, b; char c; { void main() { } }");
        assert_eq!(compilation.object().unwrap().data_size, 3);
    }

    #[test]
    fn test_if_else_patches_both_jumps() {
        assert_eq!(
            ops(&in_main("if (a == 1) print(1); else print(2);")),
            vec![
                Op::Enter { params: 0, locals: 1 },
                Op::GetStatic(0),
                Op::Const(1),
                Op::JumpIf(Relop::Ne, 16),
                Op::Const(1),
                Op::Const(0),
                Op::Print,
                Op::Jmp(19),
                Op::Const(2),
                Op::Const(0),
                Op::Print,
                Op::Exit,
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_if_without_else() {
        assert_eq!(
            ops(&in_main("if (a > 0) a = 0;")),
            vec![
                Op::Enter { params: 0, locals: 1 },
                Op::GetStatic(0),
                Op::Const(0),
                Op::JumpIf(Relop::Le, 14),
                Op::Const(0),
                Op::PutStatic(0),
                Op::Exit,
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_while_jumps_back_to_condition() {
        assert_eq!(
            ops(&in_main("while (a < 3) a = a + 1;")),
            vec![
                Op::Enter { params: 0, locals: 1 },
                Op::GetStatic(0),
                Op::Const(3),
                Op::JumpIf(Relop::Ge, 21),
                Op::GetStatic(0),
                Op::Const(1),
                Op::Add,
                Op::PutStatic(0),
                Op::Jmp(3),
                Op::Exit,
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_unary_minus_folds_constants() {
        assert_eq!(
            ops(&in_main("a = -5; i = -a;")),
            vec![
                Op::Enter { params: 0, locals: 1 },
                Op::Const(-5),
                Op::PutStatic(0),
                Op::GetStatic(0),
                Op::Neg,
                Op::Store(0),
                Op::Exit,
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_builtins_emit_no_call() {
        assert_eq!(
            ops(&in_main("a = len(arr); a = ord(c); c = chr(a);")),
            vec![
                Op::Enter { params: 0, locals: 1 },
                Op::GetStatic(2),
                Op::ArrayLength,
                Op::PutStatic(0),
                Op::GetStatic(1),
                Op::PutStatic(0),
                Op::GetStatic(0),
                Op::PutStatic(1),
                Op::Exit,
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_call_statement_pops_unused_result() {
        let source = indoc! {"
            program P {
                int f() { return 1; }
                void main() { f(); }
            }
        "};
        assert_eq!(
            ops(source),
            vec![
                Op::Enter { params: 0, locals: 0 },
                Op::Const(1),
                Op::Exit,
                Op::Return,
                Op::Trap(1),
                Op::Enter { params: 0, locals: 0 },
                Op::Call(0),
                Op::Pop,
                Op::Exit,
                Op::Return,
            ]
        );
        assert_eq!(compile(source).object().unwrap().main_pc, 8);
    }

    #[test]
    fn test_array_element_store() {
        assert_eq!(
            ops(&in_main("arr = new int[4]; arr[1] = 7;")),
            vec![
                Op::Enter { params: 0, locals: 1 },
                Op::Const(4),
                Op::NewArray(crate::bytecode::op::ElemSize::Word),
                Op::PutStatic(2),
                Op::GetStatic(2),
                Op::Const(1),
                Op::Const(7),
                Op::AStore,
                Op::Exit,
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_read_stores_into_designator() {
        assert_eq!(
            ops(&in_main("read(c); read(i);")),
            vec![
                Op::Enter { params: 0, locals: 1 },
                Op::BRead,
                Op::PutStatic(1),
                Op::Read,
                Op::Store(0),
                Op::Exit,
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_print_width() {
        assert_eq!(
            ops(&in_main("print(c, 3);")),
            vec![
                Op::Enter { params: 0, locals: 1 },
                Op::GetStatic(1),
                Op::Const(3),
                Op::BPrint,
                Op::Exit,
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_duplicate_declaration_reported_once() {
        assert_eq!(
            messages("program P int x; int x; { void main() { } }"),
            vec!["x declared twice"]
        );
    }

    #[test]
    fn test_undeclared_name_is_absorbed() {
        assert_eq!(
            messages(&in_main("a = b * 2 + 1; c = chr(a);")),
            vec!["b not declared"]
        );
    }

    #[test]
    fn test_errors_close_together_are_throttled() {
        assert_eq!(messages(&in_main("x = y;")), vec!["x not declared"]);
    }

    #[test]
    fn test_missing_token_then_recovery() {
        assert_eq!(messages(&in_main("a = 1 a = 2;")), vec!["; expected"]);
    }

    #[test]
    fn test_invalid_statement_start_resyncs() {
        assert_eq!(
            messages(&in_main("a = 1; ) a = 2;")),
            vec!["invalid start of statement"]
        );
    }

    #[test]
    fn test_invalid_declaration_resyncs() {
        assert_eq!(
            messages("program P int x; 5; { void main() { } }"),
            vec!["invalid start of Declaration"]
        );
    }

    #[test]
    fn test_trailing_tokens_after_program() {
        assert_eq!(
            messages("program P { void main() { } } x"),
            vec!["end of file found before end of program"]
        );
    }

    #[test]
    fn test_main_must_be_void() {
        assert_eq!(
            messages("program P { int main() { return 0; } }"),
            vec!["main method must be void"]
        );
        assert_eq!(
            messages("program P { void main(int a) { } }"),
            vec!["main method must not have parameters"]
        );
    }

    #[test]
    fn test_main_is_required() {
        assert_eq!(
            messages("program P { void f() { } }"),
            vec!["method main not found"]
        );
    }

    #[test]
    fn test_return_checks() {
        let source = indoc! {"
            program P {
                void f() { return 1; }
                int g() { return; }
                char h() { return 1; }
                void main() { }
            }
        "};
        assert_eq!(
            messages(source),
            vec![
                "void method must not return a value",
                "return expression expected",
                "return type must match method type",
            ]
        );
    }

    #[test]
    fn test_assignment_type_mismatch() {
        assert_eq!(
            messages(&in_main("a = c;")),
            vec!["incompatible types in assignment"]
        );
    }

    #[test]
    fn test_selector_misuse() {
        assert_eq!(
            messages(&in_main("a.f = 1;")),
            vec!["dereferenced object is not a class"]
        );
        assert_eq!(
            messages(&in_main("arr[c] = 1;")),
            vec!["index must be an int"]
        );
    }

    #[test]
    fn test_unknown_field() {
        let source = indoc! {"
            program P
                class Point { int x, y; }
                Point p;
            {
                void main() { p.z = 1; }
            }
        "};
        assert_eq!(messages(source), vec!["z is not a field of Point"]);
    }

    #[test]
    fn test_names_that_are_not_values() {
        assert_eq!(
            messages(&in_main("a = int;")),
            vec!["identifier does not denote a value"]
        );
        assert_eq!(
            messages(&in_main("a = P;")),
            vec!["identifier does not denote a value"]
        );
        assert_eq!(
            messages(&in_main("a(1);")),
            vec!["called object is not a method"]
        );
    }

    #[test]
    fn test_void_method_in_expression() {
        let source = "program P int a; { void f() { } void main() { a = f(); } }";
        assert_eq!(messages(source), vec!["procedure called as a function"]);
    }

    #[test]
    fn test_assignment_without_operator() {
        assert_eq!(
            messages(&in_main("a;")),
            vec!["assignment or method call expected"]
        );
    }

    #[test]
    fn test_assigning_to_a_constant() {
        let source = "program P final int K = 3; { void main() { K = 4; } }";
        assert_eq!(messages(source), vec!["cannot assign to a constant"]);
    }

    #[test]
    fn test_constant_declarations() {
        assert_eq!(
            ops("program P final int K = 7; final char C = 'x'; int a; { void main() { a = K; } }"),
            vec![
                Op::Enter { params: 0, locals: 0 },
                Op::Const(7),
                Op::PutStatic(0),
                Op::Exit,
                Op::Return,
            ]
        );
        assert_eq!(
            messages("program P final char C = 1; { void main() { } }"),
            vec!["char constant expected"]
        );
    }

    #[test]
    fn test_io_type_checks() {
        assert_eq!(
            messages(&in_main("read(arr);")),
            vec!["can only read int or char variables"]
        );
        assert_eq!(
            messages(&in_main("print(arr);")),
            vec!["can only print int or char values"]
        );
    }

    #[test]
    fn test_literal_overflow_is_a_warning_by_default() {
        let compilation = compile(&in_main("a = 99999999999;"));
        assert!(compilation.is_ok());
        assert_eq!(compilation.warnings().len(), 1);
        assert_eq!(compilation.warnings()[0].message, "number overflow");
    }

    #[test]
    fn test_strict_literals_make_overflow_an_error() {
        let options = CompileOptions {
            strict_literals: true,
            ..CompileOptions::default()
        };
        let compilation = crate::compile_with(&in_main("a = 99999999999;"), &options);
        assert_eq!(compilation.error_count(), 1);
        assert_eq!(compilation.errors()[0].message, "number overflow");
    }

    #[test]
    fn test_bad_char_constant_is_counted() {
        assert_eq!(messages(&in_main("c = '';")), vec!["empty char constant"]);
        assert_eq!(
            messages(&in_main("c = 'a\n; print(c);")),
            vec!["unterminated char constant"]
        );
    }

    #[test]
    fn test_diagnostic_position_is_lookahead() {
        let source = indoc! {"
            program P {
              void main() {
                print(1)
              }
            }
        "};
        let compilation = compile(source);
        let error = &compilation.errors()[0];
        assert_eq!(error.to_string(), "line 4 col 2: ; expected");
    }

    #[test]
    fn test_too_many_locals() {
        let vars: Vec<String> = (0..256).map(|i| format!("v{}", i)).collect();
        let source = format!(
            "program P {{ void main() int {}; {{ }} }}",
            vars.join(", ")
        );
        assert_eq!(messages(&source), vec!["too many local variables"]);
    }

    #[test]
    fn test_code_too_large() {
        let body = "a = 1000000;".repeat(9000);
        let compilation = compile(&in_main(&body));
        let errors: Vec<&str> = compilation.errors().iter().map(|d| d.message.as_str()).collect();
        assert_eq!(errors, vec!["program too large"]);
        assert!(compilation.object().is_none());
    }

    #[test]
    fn test_too_many_globals() {
        let vars: Vec<String> = (0..65_536).map(|i| format!("g{}", i)).collect();
        let source = format!(
            "program P int {}; {{ void main() {{ }} }}",
            vars.join(", ")
        );
        assert_eq!(messages(&source), vec!["program too large"]);

        let fits = source.replace(", g65535;", ";");
        assert!(compile(&fits).is_ok());
    }
}
