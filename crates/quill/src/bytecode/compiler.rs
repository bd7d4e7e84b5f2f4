//! AST to bytecode compilation.
//!
//! A depth-first visit of the tree emits instructions into the builder of
//! the currently active emission context. Nested declarations (methods,
//! lambdas, comprehension bodies) push a fresh context and pop it on exit.
//! Declared names are collected in a pre-pass per function so the temp
//! allocator can start above every declared slot before any statement is
//! emitted.

use std::fmt;

use crate::{
    ast::{
        AssignTarget, BinOp, ClassDecl, ComprehensionKind, Expr, ForTarget, FunctionDecl, Literal, Loc, MatchArm,
        Pattern, Stmt,
    },
    bytecode::{
        builder::{CodeBuilder, JumpLabel},
        code::CodeFlags,
        op::Op,
        optimizer,
    },
    intern::{Interns, StaticStrings},
    module::{ClassSpec, Constant, ConstantPool, EnumSpec, InterfaceSpec, Module},
    symbol::{Resolution, SymbolTable},
};

/// A user-facing compilation failure: misplaced control flow or a
/// reference only valid in a narrower context. Malformed trees that no
/// front-end can produce panic instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub loc: Loc,
}

impl CompileError {
    fn new(message: impl Into<String>, loc: Loc) -> Self {
        Self {
            message: message.into(),
            loc,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.loc.line, self.message)
    }
}

impl std::error::Error for CompileError {}

type CResult<T> = Result<T, CompileError>;

/// Compiles a module body into a cacheable `Module`.
pub fn compile_module(tree: &crate::ast::Module, name: &str, interns: &mut Interns) -> Result<Module, CompileError> {
    let mut compiler = Compiler {
        interns,
        symbols: SymbolTable::new(),
        pool: ConstantPool::new(),
        contexts: Vec::new(),
        loc: Loc::default(),
    };
    compiler.push_context("<module>", Vec::new(), CodeFlags::default(), false);
    for stmt in &tree.body {
        compiler.stmt(stmt)?;
    }
    let init = compiler.finish_context();
    Ok(Module {
        name: name.to_owned(),
        pool: compiler.pool.into_constants(),
        init,
    })
}

struct LoopLabels {
    break_label: JumpLabel,
    continue_label: JumpLabel,
    /// Depth of `open_blocks` at loop entry; a jump out of the loop closes
    /// every block opened above it.
    open_depth: usize,
}

/// A runtime construct that is entered by an instruction and must be
/// closed by a matching one before control leaves it sideways.
#[derive(Debug, Clone, Copy)]
enum OpenBlock {
    /// An armed exception handler awaiting `PopExceptionHandler`.
    Handler,
    /// An entered with-block awaiting `EndWith`.
    With,
}

/// One emission context: the builder of the function body being compiled
/// plus the compiler state scoped to it.
struct FnContext {
    builder: CodeBuilder,
    loops: Vec<LoopLabels>,
    open_blocks: Vec<OpenBlock>,
    is_method: bool,
}

struct Compiler<'a> {
    interns: &'a mut Interns,
    symbols: SymbolTable,
    pool: ConstantPool,
    contexts: Vec<FnContext>,
    loc: Loc,
}

impl Compiler<'_> {
    fn ctx(&mut self) -> &mut FnContext {
        self.contexts.last_mut().expect("no active emission context")
    }

    fn emit(&mut self, op: Op, arg: i32) {
        let loc = self.loc;
        self.ctx().builder.emit(op, arg, Some(loc));
    }

    fn emit_jump(&mut self, op: Op, label: JumpLabel) {
        let loc = self.loc;
        self.ctx().builder.emit_jump(op, label, Some(loc));
    }

    fn label(&mut self) -> JumpLabel {
        self.ctx().builder.create_label()
    }

    fn mark(&mut self, label: JumpLabel) {
        self.ctx().builder.mark_label(label);
    }

    fn name_const(&mut self, name: &str) -> i32 {
        pool_arg(self.pool.add(Constant::Str(name.to_owned())))
    }

    // ------------------------------------------------------------------
    // contexts
    // ------------------------------------------------------------------

    fn push_context(&mut self, name: &str, params: Vec<(String, u32)>, flags: CodeFlags, is_method: bool) {
        let mut builder = CodeBuilder::new(name, params, flags);
        builder.set_local_base(self.symbols.next_slot());
        self.contexts.push(FnContext {
            builder,
            loops: Vec::new(),
            open_blocks: Vec::new(),
            is_method,
        });
    }

    /// Ends a function body: appends the implicit null return, finalizes,
    /// optimizes, and pools the code object.
    fn finish_context(&mut self) -> u32 {
        self.emit(Op::LoadNull, 0);
        self.emit(Op::Return, 0);
        let mut context = self.contexts.pop().expect("no active emission context");
        let mut code = context.builder.finalize();
        optimizer::optimize(&mut code);
        self.pool.add(Constant::Code(code))
    }

    /// Compiles a nested function body in its own scope and context.
    fn compile_function(
        &mut self,
        name: &str,
        params: &[crate::ast::Param],
        variadic: bool,
        body: &[Stmt],
        is_method: bool,
    ) -> CResult<u32> {
        let floor = self.ctx().builder.max_locals();
        self.symbols.enter_function();
        self.symbols.bump_to(floor);
        let params: Vec<(String, u32)> = params
            .iter()
            .map(|p| {
                let id = self.interns.intern(&p.name);
                (p.name.clone(), self.symbols.declare_local(id))
            })
            .collect();
        let generator = self.predeclare(body);
        let flags = CodeFlags {
            variadic,
            generator,
            instance_method: is_method,
        };
        self.push_context(name, params, flags, is_method);
        for stmt in body {
            self.stmt(stmt)?;
        }
        let index = self.finish_context();
        self.symbols.exit_function();
        Ok(index)
    }

    /// Collects every name the body assigns at this function's scope, so
    /// all slots exist before emission starts. Returns whether the body
    /// yields at this nesting level. Nested function bodies are skipped;
    /// they declare in their own scope.
    fn predeclare(&mut self, body: &[Stmt]) -> bool {
        let mut has_yield = false;
        for stmt in body {
            match stmt {
                Stmt::Assign {
                    target: AssignTarget::Name(name),
                    ..
                }
                | Stmt::AugAssign {
                    target: AssignTarget::Name(name),
                    ..
                } => {
                    self.predeclare_name(name);
                }
                Stmt::Assign { .. } | Stmt::AugAssign { .. } => {}
                Stmt::Global { names, .. } => {
                    for name in names {
                        let id = self.interns.intern(name);
                        self.symbols.declare_global(id);
                    }
                }
                Stmt::If { then, orelse, .. } => {
                    has_yield |= self.predeclare(then);
                    has_yield |= self.predeclare(orelse);
                }
                Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => {
                    has_yield |= self.predeclare(body);
                }
                Stmt::For { init, step, body, .. } => {
                    if let Some(init) = init {
                        has_yield |= self.predeclare(std::slice::from_ref(init));
                    }
                    if let Some(step) = step {
                        has_yield |= self.predeclare(std::slice::from_ref(step));
                    }
                    has_yield |= self.predeclare(body);
                }
                Stmt::Foreach { target, body, .. } => {
                    self.predeclare_for_target(target);
                    has_yield |= self.predeclare(body);
                }
                Stmt::Try {
                    body, binding, handler, ..
                } => {
                    has_yield |= self.predeclare(body);
                    if let Some(binding) = binding {
                        self.predeclare_name(binding);
                    }
                    has_yield |= self.predeclare(handler);
                }
                Stmt::With { binding, body, .. } => {
                    if let Some(binding) = binding {
                        self.predeclare_name(binding);
                    }
                    has_yield |= self.predeclare(body);
                }
                Stmt::Match { arms, .. } => {
                    for arm in arms {
                        self.predeclare_pattern(&arm.pattern);
                        has_yield |= self.predeclare(&arm.body);
                    }
                }
                Stmt::Yield { .. } => has_yield = true,
                Stmt::FunctionDecl(decl) => self.predeclare_name(&decl.name),
                Stmt::ClassDecl(decl) => self.predeclare_name(&decl.name),
                Stmt::InterfaceDecl(decl) => self.predeclare_name(&decl.name),
                Stmt::EnumDecl(decl) => self.predeclare_name(&decl.name),
                Stmt::Expr(_) | Stmt::Break(_) | Stmt::Continue(_) | Stmt::Return { .. } | Stmt::Raise { .. } => {}
            }
        }
        has_yield
    }

    fn predeclare_name(&mut self, name: &str) {
        let id = self.interns.intern(name);
        let _ = self.symbols.resolve_assign(id);
    }

    fn predeclare_for_target(&mut self, target: &ForTarget) {
        match target {
            ForTarget::Name(name) => self.predeclare_name(name),
            ForTarget::Tuple(names) => {
                for name in names {
                    self.predeclare_name(name);
                }
            }
        }
    }

    fn predeclare_pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Binding(name) => self.predeclare_name(name),
            Pattern::Tuple(subs) => {
                for sub in subs {
                    self.predeclare_pattern(sub);
                }
            }
            Pattern::Wildcard | Pattern::Literal(_) | Pattern::Value(_) | Pattern::Type(_) => {}
        }
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn stmt(&mut self, stmt: &Stmt) -> CResult<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.loc = expr.loc();
                self.expr(expr)?;
                self.emit(Op::Pop, 0);
            }
            Stmt::Assign { target, value, loc } => {
                self.loc = *loc;
                self.assign(target, value)?;
            }
            Stmt::AugAssign { target, op, value, loc } => {
                self.loc = *loc;
                self.aug_assign(target, *op, value)?;
            }
            Stmt::Global { names, .. } => {
                for name in names {
                    let id = self.interns.intern(name);
                    self.symbols.declare_global(id);
                }
            }
            Stmt::If { cond, then, orelse, loc } => {
                self.loc = *loc;
                let else_label = self.label();
                let end_label = self.label();
                self.expr(cond)?;
                self.emit_jump(Op::JumpIfFalse, else_label);
                for s in then {
                    self.stmt(s)?;
                }
                self.emit_jump(Op::Jump, end_label);
                self.mark(else_label);
                for s in orelse {
                    self.stmt(s)?;
                }
                self.mark(end_label);
            }
            Stmt::While { cond, body, loc } => {
                self.loc = *loc;
                let start = self.label();
                let break_label = self.label();
                self.mark(start);
                self.expr(cond)?;
                self.emit_jump(Op::JumpIfFalse, break_label);
                self.loop_body(body, break_label, start)?;
                self.emit_jump(Op::Jump, start);
                self.mark(break_label);
            }
            Stmt::DoWhile { body, cond, loc } => {
                self.loc = *loc;
                let start = self.label();
                let continue_label = self.label();
                let break_label = self.label();
                self.mark(start);
                self.loop_body(body, break_label, continue_label)?;
                self.mark(continue_label);
                self.expr(cond)?;
                self.emit_jump(Op::JumpIfTrue, start);
                self.mark(break_label);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                loc,
            } => {
                self.loc = *loc;
                if let Some(init) = init {
                    self.stmt(init)?;
                }
                let cond_label = self.label();
                let after_label = self.label();
                let break_label = self.label();
                self.mark(cond_label);
                if let Some(cond) = cond {
                    self.expr(cond)?;
                    self.emit_jump(Op::JumpIfFalse, break_label);
                }
                self.loop_body(body, break_label, after_label)?;
                self.mark(after_label);
                if let Some(step) = step {
                    self.stmt(step)?;
                }
                self.emit_jump(Op::Jump, cond_label);
                self.mark(break_label);
            }
            Stmt::Foreach { target, iter, body, loc } => {
                self.loc = *loc;
                self.foreach(iter, target, |c, break_label, continue_label| {
                    c.loop_body(body, break_label, continue_label)
                })?;
            }
            Stmt::Break(loc) => {
                self.loc = *loc;
                let labels = self
                    .ctx()
                    .loops
                    .last()
                    .ok_or_else(|| CompileError::new("break outside of a loop", *loc))?;
                let (label, open_depth) = (labels.break_label, labels.open_depth);
                self.close_open_blocks(open_depth);
                self.emit_jump(Op::Jump, label);
            }
            Stmt::Continue(loc) => {
                self.loc = *loc;
                let labels = self
                    .ctx()
                    .loops
                    .last()
                    .ok_or_else(|| CompileError::new("continue outside of a loop", *loc))?;
                let (label, open_depth) = (labels.continue_label, labels.open_depth);
                self.close_open_blocks(open_depth);
                self.emit_jump(Op::Jump, label);
            }
            Stmt::Return { value, loc } => {
                self.loc = *loc;
                match value {
                    Some(value) => self.expr(value)?,
                    None => self.emit(Op::LoadNull, 0),
                }
                self.emit(Op::Return, 0);
            }
            Stmt::Yield { value, loc } => {
                self.loc = *loc;
                self.expr(value)?;
                self.emit(Op::Yield, 0);
            }
            Stmt::Raise { value, loc } => {
                self.loc = *loc;
                self.expr(value)?;
                self.emit(Op::Raise, 0);
            }
            Stmt::Try {
                body,
                filters,
                binding,
                handler,
                loc,
            } => {
                self.loc = *loc;
                let except_label = self.label();
                let end_label = self.label();
                self.emit_jump(Op::PushExceptionHandler, except_label);
                self.ctx().open_blocks.push(OpenBlock::Handler);
                for s in body {
                    self.stmt(s)?;
                }
                self.emit(Op::PopExceptionHandler, 0);
                // Unwinding into the handler already popped the entry, so
                // the handler clause compiles with the block closed.
                self.ctx().open_blocks.pop();
                self.emit_jump(Op::Jump, end_label);
                self.mark(except_label);
                for filter in filters {
                    self.expr(filter)?;
                }
                self.emit(Op::BeginExcept, arity(filters.len()));
                if let Some(binding) = binding {
                    self.emit(Op::LoadException, 0);
                    self.store_name(binding);
                }
                for s in handler {
                    self.stmt(s)?;
                }
                self.mark(end_label);
            }
            Stmt::With { target, binding, body, loc } => {
                self.loc = *loc;
                self.expr(target)?;
                self.emit(Op::BeginWith, 0);
                self.ctx().open_blocks.push(OpenBlock::With);
                match binding {
                    Some(binding) => self.store_name(binding),
                    None => self.emit(Op::Pop, 0),
                }
                for s in body {
                    self.stmt(s)?;
                }
                self.emit(Op::EndWith, 0);
                self.ctx().open_blocks.pop();
            }
            Stmt::Match { subject, arms, loc } => {
                self.loc = *loc;
                self.match_stmt(subject, arms)?;
            }
            Stmt::FunctionDecl(decl) => {
                self.loc = decl.loc;
                let index = self.compile_function(&decl.name, &decl.params, decl.variadic, &decl.body, false)?;
                self.emit(Op::BuildClosure, pool_arg(index));
                self.store_name(&decl.name);
            }
            Stmt::ClassDecl(decl) => {
                self.loc = decl.loc;
                self.class_decl(decl)?;
            }
            Stmt::InterfaceDecl(decl) => {
                self.loc = decl.loc;
                let index = self.pool.add(Constant::Interface(InterfaceSpec {
                    name: decl.name.clone(),
                    kind: decl.kind,
                    required: decl.required.clone(),
                }));
                self.emit(Op::BuildInterface, pool_arg(index));
                self.store_name(&decl.name);
            }
            Stmt::EnumDecl(decl) => {
                self.loc = decl.loc;
                let index = self.pool.add(Constant::Enum(EnumSpec {
                    name: decl.name.clone(),
                    variants: decl.variants.clone(),
                }));
                self.emit(Op::BuildEnum, pool_arg(index));
                self.store_name(&decl.name);
            }
        }
        Ok(())
    }

    fn loop_body(&mut self, body: &[Stmt], break_label: JumpLabel, continue_label: JumpLabel) -> CResult<()> {
        let open_depth = self.ctx().open_blocks.len();
        self.ctx().loops.push(LoopLabels {
            break_label,
            continue_label,
            open_depth,
        });
        let result = body.iter().try_for_each(|s| self.stmt(s));
        self.ctx().loops.pop();
        result
    }

    /// Closes every handler and with-block opened above `depth`, innermost
    /// first, so a jump does not leave stale entries armed in the frame.
    fn close_open_blocks(&mut self, depth: usize) {
        let pending: Vec<OpenBlock> = self.ctx().open_blocks[depth..].to_vec();
        for block in pending.iter().rev() {
            match block {
                OpenBlock::Handler => self.emit(Op::PopExceptionHandler, 0),
                OpenBlock::With => self.emit(Op::EndWith, 0),
            }
        }
    }

    fn assign(&mut self, target: &AssignTarget, value: &Expr) -> CResult<()> {
        match target {
            AssignTarget::Name(name) => {
                self.expr(value)?;
                self.store_name(name);
            }
            AssignTarget::Attr { obj, name } => {
                self.expr(value)?;
                self.expr(obj)?;
                let name = self.name_const(name);
                self.emit(Op::StoreAttribute, name);
            }
            AssignTarget::Index { obj, index } => {
                self.expr(value)?;
                self.expr(obj)?;
                self.expr(index)?;
                self.emit(Op::StoreIndex, 0);
            }
        }
        Ok(())
    }

    /// Compound assignment loads the target once, applies the operator, and
    /// stores back; attribute and index receivers are evaluated exactly
    /// once through temporaries.
    fn aug_assign(&mut self, target: &AssignTarget, op: BinOp, value: &Expr) -> CResult<()> {
        match target {
            AssignTarget::Name(name) => {
                self.load_name(name);
                self.expr(value)?;
                self.emit(Op::BinaryOp, op as i32);
                self.store_name(name);
            }
            AssignTarget::Attr { obj, name } => {
                let name = self.name_const(name);
                self.expr(obj)?;
                let obj_temp = self.ctx().builder.alloc_temp();
                self.emit(Op::StoreLocal, slot_arg(obj_temp));
                self.emit(Op::LoadLocal, slot_arg(obj_temp));
                self.emit(Op::LoadAttribute, name);
                self.expr(value)?;
                self.emit(Op::BinaryOp, op as i32);
                self.emit(Op::LoadLocal, slot_arg(obj_temp));
                self.emit(Op::StoreAttribute, name);
                self.ctx().builder.free_temp(obj_temp);
            }
            AssignTarget::Index { obj, index } => {
                self.expr(obj)?;
                let obj_temp = self.ctx().builder.alloc_temp();
                self.emit(Op::StoreLocal, slot_arg(obj_temp));
                self.expr(index)?;
                let index_temp = self.ctx().builder.alloc_temp();
                self.emit(Op::StoreLocal, slot_arg(index_temp));
                self.emit(Op::LoadLocal, slot_arg(obj_temp));
                self.emit(Op::LoadLocal, slot_arg(index_temp));
                self.emit(Op::LoadIndex, 0);
                self.expr(value)?;
                self.emit(Op::BinaryOp, op as i32);
                self.emit(Op::LoadLocal, slot_arg(obj_temp));
                self.emit(Op::LoadLocal, slot_arg(index_temp));
                self.emit(Op::StoreIndex, 0);
                self.ctx().builder.free_temp(index_temp);
                self.ctx().builder.free_temp(obj_temp);
            }
        }
        Ok(())
    }

    /// Emits the iteration protocol around a body: `get_iterator`, `reset`,
    /// then a `move_next`/`get_current` loop binding the target each pass.
    fn foreach(
        &mut self,
        iter: &Expr,
        target: &ForTarget,
        body: impl FnOnce(&mut Self, JumpLabel, JumpLabel) -> CResult<()>,
    ) -> CResult<()> {
        let start = self.label();
        let break_label = self.label();

        self.expr(iter)?;
        self.protocol_call(StaticStrings::GetIterator, 0);
        let iter_temp = self.ctx().builder.alloc_temp();
        self.emit(Op::StoreLocal, slot_arg(iter_temp));

        self.emit(Op::LoadLocal, slot_arg(iter_temp));
        self.protocol_call(StaticStrings::Reset, 0);
        self.emit(Op::Pop, 0);

        self.mark(start);
        self.emit(Op::LoadLocal, slot_arg(iter_temp));
        self.protocol_call(StaticStrings::MoveNext, 0);
        self.emit_jump(Op::JumpIfFalse, break_label);

        self.emit(Op::LoadLocal, slot_arg(iter_temp));
        self.protocol_call(StaticStrings::GetCurrent, 0);
        self.bind_for_target(target);

        body(self, break_label, start)?;
        self.emit_jump(Op::Jump, start);
        self.mark(break_label);
        self.ctx().builder.free_temp(iter_temp);
        Ok(())
    }

    /// Invokes a protocol method on the value currently on top of the
    /// stack. Protocol receivers carry no argument expressions, so the
    /// receiver can be loaded after the (absent) arguments.
    fn protocol_call(&mut self, method: StaticStrings, argc: usize) {
        let text: &'static str = method.into();
        let name = self.name_const(text);
        self.emit(Op::LoadAttribute, name);
        self.emit(Op::Invoke, arity(argc));
    }

    /// Binds the value on top of the stack to a foreach target.
    fn bind_for_target(&mut self, target: &ForTarget) {
        match target {
            ForTarget::Name(name) => self.store_name(name),
            ForTarget::Tuple(names) => {
                let current = self.ctx().builder.alloc_temp();
                self.emit(Op::StoreLocal, slot_arg(current));
                for (position, name) in names.iter().enumerate() {
                    self.emit(Op::LoadLocal, slot_arg(current));
                    let index = self.pool.add(Constant::Int(position as i64));
                    self.emit(Op::LoadConst, pool_arg(index));
                    self.emit(Op::LoadIndex, 0);
                    self.store_name(name);
                }
                self.ctx().builder.free_temp(current);
            }
        }
    }

    fn match_stmt(&mut self, subject: &Expr, arms: &[MatchArm]) -> CResult<()> {
        self.expr(subject)?;
        let subject_temp = self.ctx().builder.alloc_temp();
        self.emit(Op::StoreLocal, slot_arg(subject_temp));
        let end_label = self.label();
        for arm in arms {
            self.loc = arm.loc;
            let next_arm = self.label();
            self.pattern(&arm.pattern, subject_temp)?;
            self.emit_jump(Op::JumpIfFalse, next_arm);
            if let Some(guard) = &arm.guard {
                self.expr(guard)?;
                self.emit_jump(Op::JumpIfFalse, next_arm);
            }
            for s in &arm.body {
                self.stmt(s)?;
            }
            self.emit_jump(Op::Jump, end_label);
            self.mark(next_arm);
        }
        self.mark(end_label);
        self.ctx().builder.free_temp(subject_temp);
        Ok(())
    }

    /// Emits a boolean-producing sequence testing the pattern against the
    /// subject slot, binding captured names on the success path.
    fn pattern(&mut self, pattern: &Pattern, subject: u32) -> CResult<()> {
        match pattern {
            Pattern::Wildcard => self.emit(Op::LoadTrue, 0),
            Pattern::Binding(name) => {
                self.emit(Op::LoadLocal, slot_arg(subject));
                self.store_name(name);
                self.emit(Op::LoadTrue, 0);
            }
            Pattern::Literal(literal) => {
                self.emit(Op::LoadLocal, slot_arg(subject));
                self.literal(literal);
                self.emit(Op::BinaryOp, BinOp::Eq as i32);
            }
            Pattern::Value(expr) => {
                self.emit(Op::LoadLocal, slot_arg(subject));
                self.expr(expr)?;
                self.emit(Op::BinaryOp, BinOp::Eq as i32);
            }
            Pattern::Type(expr) => {
                self.emit(Op::LoadLocal, slot_arg(subject));
                self.expr(expr)?;
                self.emit(Op::IsInstance, 0);
            }
            Pattern::Tuple(subs) => {
                let fail = self.label();
                let done = self.label();
                self.emit(Op::LoadLocal, slot_arg(subject));
                self.emit(Op::TestTuple, arity(subs.len()));
                self.emit_jump(Op::JumpIfFalse, fail);
                let element = self.ctx().builder.alloc_temp();
                for (position, sub) in subs.iter().enumerate() {
                    self.emit(Op::LoadLocal, slot_arg(subject));
                    let index = self.pool.add(Constant::Int(position as i64));
                    self.emit(Op::LoadConst, pool_arg(index));
                    self.emit(Op::LoadIndex, 0);
                    self.emit(Op::StoreLocal, slot_arg(element));
                    self.pattern(sub, element)?;
                    self.emit_jump(Op::JumpIfFalse, fail);
                }
                self.ctx().builder.free_temp(element);
                self.emit(Op::LoadTrue, 0);
                self.emit_jump(Op::Jump, done);
                self.mark(fail);
                self.emit(Op::LoadFalse, 0);
                self.mark(done);
            }
        }
        Ok(())
    }

    fn class_decl(&mut self, decl: &ClassDecl) -> CResult<()> {
        for base in &decl.bases {
            self.expr(base)?;
        }
        let constructor = match &decl.constructor {
            Some(ctor) => Some(self.method(&decl.name, ctor)?),
            None => None,
        };
        let mut methods = Vec::with_capacity(decl.methods.len());
        for method in &decl.methods {
            methods.push((method.name.clone(), self.method(&decl.name, method)?));
        }
        let mut properties = Vec::with_capacity(decl.properties.len());
        for property in &decl.properties {
            let getter_name = format!("{}.{}", decl.name, property.name);
            let getter = self.compile_function(&getter_name, &[], false, &property.getter, true)?;
            let setter = match &property.setter {
                Some((param, body)) => {
                    let param = crate::ast::Param::new(param);
                    Some(self.compile_function(&getter_name, std::slice::from_ref(&param), false, body, true)?)
                }
                None => None,
            };
            properties.push((property.name.clone(), getter, setter));
        }
        let spec = self.pool.add(Constant::Class(ClassSpec {
            name: decl.name.clone(),
            base_count: arity_u32(decl.bases.len()),
            constructor,
            methods,
            properties,
        }));
        self.emit(Op::BuildClass, pool_arg(spec));
        self.store_name(&decl.name);
        Ok(())
    }

    fn method(&mut self, class_name: &str, decl: &FunctionDecl) -> CResult<u32> {
        let qualified = format!("{class_name}.{}", decl.name);
        self.compile_function(&qualified, &decl.params, decl.variadic, &decl.body, true)
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn expr(&mut self, expr: &Expr) -> CResult<()> {
        self.loc = expr.loc();
        match expr {
            Expr::Literal(literal, _) => self.literal(literal),
            Expr::Name(name, _) => self.load_name(name),
            Expr::SelfRef(loc) => {
                if !self.contexts.iter().any(|c| c.is_method) {
                    return Err(CompileError::new("self outside of a method", *loc));
                }
                self.emit(Op::LoadSelf, 0);
            }
            Expr::Exception(_) => self.emit(Op::LoadException, 0),
            Expr::Attr { obj, name, .. } => {
                self.expr(obj)?;
                let name = self.name_const(name);
                self.emit(Op::LoadAttribute, name);
            }
            Expr::Index { obj, index, .. } => {
                self.expr(obj)?;
                self.expr(index)?;
                self.emit(Op::LoadIndex, 0);
            }
            Expr::Call {
                callee, args, var_arg, ..
            } => {
                // The callee evaluates before its arguments, in source
                // order, then reloads on top for the invoke.
                self.expr(callee)?;
                let callee_temp = self.ctx().builder.alloc_temp();
                self.emit(Op::StoreLocal, slot_arg(callee_temp));
                for arg in args {
                    self.expr(arg)?;
                }
                if let Some(var_arg) = var_arg {
                    self.expr(var_arg)?;
                }
                self.emit(Op::LoadLocal, slot_arg(callee_temp));
                self.ctx().builder.free_temp(callee_temp);
                let op = if var_arg.is_some() { Op::InvokeVar } else { Op::Invoke };
                self.emit(op, arity(args.len()));
            }
            Expr::SuperCall { base, args, .. } => {
                for arg in args {
                    self.expr(arg)?;
                }
                self.expr(base)?;
                self.emit(Op::InvokeSuper, arity(args.len()));
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.emit(Op::BinaryOp, *op as i32);
            }
            Expr::Unary { op, operand, .. } => {
                self.expr(operand)?;
                self.emit(Op::UnaryOp, *op as i32);
            }
            Expr::And { lhs, rhs, .. } => {
                let short = self.label();
                let end = self.label();
                self.expr(lhs)?;
                self.emit(Op::Dup, 0);
                self.emit_jump(Op::JumpIfFalse, short);
                self.emit(Op::Pop, 0);
                self.expr(rhs)?;
                self.emit_jump(Op::Jump, end);
                self.mark(short);
                self.emit(Op::Pop, 0);
                self.emit(Op::LoadFalse, 0);
                self.mark(end);
            }
            Expr::Or { lhs, rhs, .. } => {
                let short = self.label();
                let end = self.label();
                self.expr(lhs)?;
                self.emit(Op::Dup, 0);
                self.emit_jump(Op::JumpIfTrue, short);
                self.emit(Op::Pop, 0);
                self.expr(rhs)?;
                self.emit_jump(Op::Jump, end);
                self.mark(short);
                self.emit(Op::Pop, 0);
                self.emit(Op::LoadTrue, 0);
                self.mark(end);
            }
            Expr::List(items, _) => {
                for item in items {
                    self.expr(item)?;
                }
                self.emit(Op::BuildList, arity(items.len()));
            }
            Expr::Tuple(items, _) => {
                for item in items {
                    self.expr(item)?;
                }
                self.emit(Op::BuildTuple, arity(items.len()));
            }
            Expr::Dict(entries, _) => {
                for (key, value) in entries {
                    self.expr(key)?;
                    self.expr(value)?;
                }
                self.emit(Op::BuildHash, arity(entries.len()));
            }
            Expr::Lambda { params, body, .. } => {
                let index = self.compile_function("<lambda>", params, false, body, false)?;
                self.emit(Op::BuildClosure, pool_arg(index));
            }
            Expr::Comprehension {
                kind,
                element,
                target,
                iter,
                cond,
                ..
            } => {
                self.comprehension(*kind, element, target, iter, cond.as_deref())?;
            }
        }
        Ok(())
    }

    fn literal(&mut self, literal: &Literal) {
        match literal {
            Literal::Null => self.emit(Op::LoadNull, 0),
            Literal::Bool(true) => self.emit(Op::LoadTrue, 0),
            Literal::Bool(false) => self.emit(Op::LoadFalse, 0),
            Literal::Int(value) => {
                let index = self.pool.add(Constant::Int(*value));
                self.emit(Op::LoadConst, pool_arg(index));
            }
            Literal::Float(value) => {
                let index = self.pool.add(Constant::Float(*value));
                self.emit(Op::LoadConst, pool_arg(index));
            }
            Literal::Str(value) => {
                let index = self.pool.add(Constant::Str(value.clone()));
                self.emit(Op::LoadConst, pool_arg(index));
            }
            Literal::Bytes(value) => {
                let index = self.pool.add(Constant::Bytes(value.clone()));
                self.emit(Op::LoadConst, pool_arg(index));
            }
        }
    }

    /// Desugars a comprehension into an immediately invoked nested
    /// function: a list accumulator loop, or a generator body yielding
    /// each element.
    fn comprehension(
        &mut self,
        kind: ComprehensionKind,
        element: &Expr,
        target: &ForTarget,
        iter: &Expr,
        cond: Option<&Expr>,
    ) -> CResult<()> {
        let floor = self.ctx().builder.max_locals();
        self.symbols.enter_function();
        self.symbols.bump_to(floor);
        self.predeclare_for_target(target);
        let flags = CodeFlags {
            variadic: false,
            generator: kind == ComprehensionKind::Generator,
            instance_method: false,
        };
        let in_method = self.contexts.iter().any(|c| c.is_method);
        self.push_context("<comprehension>", Vec::new(), flags, in_method);

        match kind {
            ComprehensionKind::List => {
                let accumulator = self.ctx().builder.alloc_temp();
                self.emit(Op::BuildList, 0);
                self.emit(Op::StoreLocal, slot_arg(accumulator));
                self.foreach(iter, target, |c, _, _| {
                    let skip = c.label();
                    if let Some(cond) = cond {
                        c.expr(cond)?;
                        c.emit_jump(Op::JumpIfFalse, skip);
                    }
                    c.expr(element)?;
                    c.emit(Op::LoadLocal, slot_arg(accumulator));
                    c.protocol_call(StaticStrings::Append, 1);
                    c.emit(Op::Pop, 0);
                    c.mark(skip);
                    Ok(())
                })?;
                self.emit(Op::LoadLocal, slot_arg(accumulator));
                self.emit(Op::Return, 0);
                self.ctx().builder.free_temp(accumulator);
            }
            ComprehensionKind::Generator => {
                self.foreach(iter, target, |c, _, _| {
                    let skip = c.label();
                    if let Some(cond) = cond {
                        c.expr(cond)?;
                        c.emit_jump(Op::JumpIfFalse, skip);
                    }
                    c.expr(element)?;
                    c.emit(Op::Yield, 0);
                    c.mark(skip);
                    Ok(())
                })?;
            }
        }

        let index = self.finish_context();
        self.symbols.exit_function();
        self.emit(Op::BuildClosure, pool_arg(index));
        self.emit(Op::Invoke, 0);
        Ok(())
    }

    // ------------------------------------------------------------------
    // names
    // ------------------------------------------------------------------

    fn load_name(&mut self, name: &str) {
        let id = self.interns.intern(name);
        match self.symbols.resolve(id) {
            Resolution::Local(slot) => self.emit(Op::LoadLocal, slot_arg(slot)),
            Resolution::Global => {
                let index = self.name_const(name);
                self.emit(Op::LoadGlobal, index);
            }
        }
    }

    fn store_name(&mut self, name: &str) {
        let id = self.interns.intern(name);
        match self.symbols.resolve_assign(id) {
            Resolution::Local(slot) => self.emit(Op::StoreLocal, slot_arg(slot)),
            Resolution::Global => {
                let index = self.name_const(name);
                self.emit(Op::StoreGlobal, index);
            }
        }
    }
}

fn pool_arg(index: u32) -> i32 {
    i32::try_from(index).expect("constant pool index exceeds i32")
}

fn slot_arg(slot: u32) -> i32 {
    i32::try_from(slot).expect("local slot exceeds i32")
}

fn arity(count: usize) -> i32 {
    i32::try_from(count).expect("arity exceeds i32")
}

fn arity_u32(count: usize) -> u32 {
    u32::try_from(count).expect("arity exceeds u32")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::{self, Expr, Stmt};
    use crate::bytecode::code::CodeObject;

    fn compile(body: Vec<Stmt>) -> Module {
        let mut interns = Interns::new();
        compile_module(&ast::Module::new(body), "test", &mut interns).expect("compilation failed")
    }

    fn init_code(module: &Module) -> &CodeObject {
        match &module.pool[module.init as usize] {
            Constant::Code(code) => code,
            other => panic!("initializer is not code: {other:?}"),
        }
    }

    #[test]
    fn test_module_names_compile_to_globals() {
        let module = compile(vec![Stmt::assign("x", Expr::int(1)), Stmt::expr(Expr::name("x"))]);
        let code = init_code(&module);
        let ops: Vec<Op> = code.instructions.iter().map(|i| i.op).collect();
        assert!(ops.contains(&Op::StoreGlobal));
        assert!(ops.contains(&Op::LoadGlobal));
        assert!(!ops.contains(&Op::StoreLocal));
    }

    #[test]
    fn test_function_locals_compile_to_slots() {
        let decl = ast::FunctionDecl {
            name: "f".to_owned(),
            params: vec![ast::Param::new("a")],
            variadic: false,
            body: vec![
                Stmt::assign("b", Expr::binary(BinOp::Add, Expr::name("a"), Expr::int(1))),
                Stmt::ret(Expr::name("b")),
            ],
            loc: Loc::default(),
        };
        let module = compile(vec![Stmt::FunctionDecl(decl)]);
        let function = module
            .pool
            .iter()
            .find_map(|c| match c {
                Constant::Code(code) if code.name == "f" => Some(code),
                _ => None,
            })
            .expect("function body pooled");
        assert_eq!(function.params, vec![("a".to_owned(), 0)]);
        let ops: Vec<(Op, i32)> = function.instructions.iter().map(|i| (i.op, i.arg)).collect();
        assert!(ops.contains(&(Op::StoreLocal, 1)));
        assert!(ops.contains(&(Op::LoadLocal, 1)));
    }

    #[test]
    fn test_if_jumps_are_absolute() {
        let module = compile(vec![Stmt::If {
            cond: Expr::bool(true),
            then: vec![Stmt::assign("x", Expr::int(1))],
            orelse: vec![Stmt::assign("x", Expr::int(2))],
            loc: Loc::default(),
        }]);
        let code = init_code(&module);
        for instr in &code.instructions {
            if instr.op.is_jump() {
                let target = instr.arg as usize;
                assert!(target <= code.instructions.len(), "target {target} out of range");
            }
        }
    }

    #[test]
    fn test_short_circuit_shape() {
        let module = compile(vec![Stmt::expr(Expr::and(Expr::name("a"), Expr::name("b")))]);
        let code = init_code(&module);
        let ops: Vec<Op> = code.instructions.iter().map(|i| i.op).collect();
        let dup = ops.iter().position(|&op| op == Op::Dup).expect("dup emitted");
        assert_eq!(ops[dup + 1], Op::JumpIfFalse);
    }

    #[test]
    fn test_break_outside_loop_is_an_error() {
        let mut interns = Interns::new();
        let result = compile_module(
            &ast::Module::new(vec![Stmt::Break(Loc::line(3))]),
            "test",
            &mut interns,
        );
        let error = result.expect_err("break must not compile");
        assert_eq!(error.loc.line, 3);
    }

    #[test]
    fn test_break_inside_try_closes_handler() {
        let module = compile(vec![Stmt::While {
            cond: Expr::bool(true),
            body: vec![Stmt::Try {
                body: vec![Stmt::Break(Loc::default())],
                filters: vec![Expr::name("RuntimeError")],
                binding: None,
                handler: Vec::new(),
                loc: Loc::default(),
            }],
            loc: Loc::default(),
        }]);
        let code = init_code(&module);
        // One pop on the break path and one on the normal exit path.
        let pops = code
            .instructions
            .iter()
            .filter(|i| i.op == Op::PopExceptionHandler)
            .count();
        assert_eq!(pops, 2);
    }

    #[test]
    fn test_break_inside_with_closes_block() {
        let module = compile(vec![Stmt::While {
            cond: Expr::bool(true),
            body: vec![Stmt::With {
                target: Expr::name("res"),
                binding: None,
                body: vec![Stmt::Break(Loc::default())],
                loc: Loc::default(),
            }],
            loc: Loc::default(),
        }]);
        let code = init_code(&module);
        let ends = code.instructions.iter().filter(|i| i.op == Op::EndWith).count();
        assert_eq!(ends, 2);
    }

    #[test]
    fn test_self_outside_method_is_an_error() {
        let mut interns = Interns::new();
        let result = compile_module(
            &ast::Module::new(vec![Stmt::expr(Expr::SelfRef(Loc::line(1)))]),
            "test",
            &mut interns,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_yield_marks_generator_flag() {
        let decl = ast::FunctionDecl {
            name: "gen".to_owned(),
            params: Vec::new(),
            variadic: false,
            body: vec![Stmt::Yield {
                value: Expr::int(1),
                loc: Loc::default(),
            }],
            loc: Loc::default(),
        };
        let module = compile(vec![Stmt::FunctionDecl(decl)]);
        let function = module
            .pool
            .iter()
            .find_map(|c| match c {
                Constant::Code(code) if code.name == "gen" => Some(code),
                _ => None,
            })
            .expect("generator body pooled");
        assert!(function.flags.generator);
    }

    #[test]
    fn test_constant_dedup_across_statements() {
        let module = compile(vec![
            Stmt::assign("a", Expr::int(7)),
            Stmt::assign("b", Expr::int(7)),
        ]);
        let ints = module
            .pool
            .iter()
            .filter(|c| matches!(c, Constant::Int(7)))
            .count();
        assert_eq!(ints, 1);
    }
}
