use std::collections::{BTreeSet, HashMap};

use crate::chunk::{Chunk, OpCode};
use crate::objects::object::Object;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_manager::ObjectManager;
use crate::scanner::{Scanner, Token, TokenType};
use crate::table::Table;
use crate::value::{make_number_value, make_object_value, make_string_value, Value};

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

pub struct Parser<'a> {
    current: Token<'a>,
    previous: Token<'a>,
    scanner: Option<Box<Scanner<'a>>>,
    has_error: bool,
    panic_mode: bool,
    compilers: Vec<Compiler<'a>>,
    class_compilers: Vec<ClassCompiler>,
    object_manager: &'a mut ObjectManager,
    intern_strings: &'a mut Table,
    artifacts: CompileArtifacts,
}

struct Local<'a> {
    name: Token<'a>,
    // -1 while declared but not yet initialized.
    depth: i32,
    is_captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDescriptor {
    pub index: u8,
    pub is_local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Function,
    Initializer,
    Method,
    Script,
}

struct Compiler<'a> {
    function: *mut ObjectFunction,
    function_type: FunctionType,
    locals: Vec<Local<'a>>,
    upvalues: Vec<UpvalueDescriptor>,
    scope_depth: i32,
    // Byte offsets whose byte is an operand rather than an opcode; the
    // serializer classifies instruction streams with this.
    operand_offsets: BTreeSet<usize>,
}

struct ClassCompiler {
    has_superclass: bool,
}

/// Side products of a compile, kept for the serializer: every function in
/// creation order plus its operand map and upvalue descriptors.
#[derive(Default)]
pub struct CompileArtifacts {
    pub functions: Vec<*mut ObjectFunction>,
    pub per_function: HashMap<*mut ObjectFunction, FunctionArtifact>,
}

#[derive(Default)]
pub struct FunctionArtifact {
    pub operand_offsets: BTreeSet<usize>,
    pub upvalues: Vec<UpvalueDescriptor>,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl From<u8> for Precedence {
    fn from(value: u8) -> Self {
        match value {
            0 => Precedence::None,
            1 => Precedence::Assignment,
            2 => Precedence::Or,
            3 => Precedence::And,
            4 => Precedence::Equality,
            5 => Precedence::Comparison,
            6 => Precedence::Term,
            7 => Precedence::Factor,
            8 => Precedence::Unary,
            9 => Precedence::Call,
            10 => Precedence::Primary,
            _ => unreachable!("Invalid precedence value: {}", value),
        }
    }
}

type ParserFn = fn(&mut Parser<'_>, bool);

#[derive(Clone, Copy)]
struct ParseRule {
    prefix: Option<ParserFn>,
    infix: Option<ParserFn>,
    precedence: Precedence,
}

impl ParseRule {
    const fn new(
        prefix: Option<ParserFn>,
        infix: Option<ParserFn>,
        precedence: Precedence,
    ) -> Self {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }
}

const RULES: [ParseRule; TokenType::Eof as usize + 1] = {
    let mut rules = [ParseRule::new(None, None, Precedence::None); TokenType::Eof as usize + 1];

    rules[TokenType::LeftParen as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.grouping()),
        Some(|parser, _can_assign| parser.call()),
        Precedence::Call,
    );

    rules[TokenType::Dot as usize] = ParseRule::new(
        None,
        Some(|parser, can_assign| parser.dot(can_assign)),
        Precedence::Call,
    );

    rules[TokenType::Minus as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.unary()),
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Term,
    );

    rules[TokenType::Plus as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Term,
    );

    rules[TokenType::Slash as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Factor,
    );

    rules[TokenType::Star as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Factor,
    );

    rules[TokenType::Bang as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.unary()),
        None,
        Precedence::None,
    );

    rules[TokenType::BangEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Equality,
    );

    rules[TokenType::EqualEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Equality,
    );

    rules[TokenType::Greater as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::GreaterEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::Less as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::LessEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::Identifier as usize] = ParseRule::new(
        Some(|parser, can_assign| parser.variable(can_assign)),
        None,
        Precedence::None,
    );

    rules[TokenType::String as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.string()),
        None,
        Precedence::None,
    );

    rules[TokenType::Number as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.number()),
        None,
        Precedence::None,
    );

    rules[TokenType::And as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.and()),
        Precedence::And,
    );

    rules[TokenType::Or as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.or()),
        Precedence::Or,
    );

    rules[TokenType::False as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.literal()),
        None,
        Precedence::None,
    );

    rules[TokenType::True as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.literal()),
        None,
        Precedence::None,
    );

    rules[TokenType::Nil as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.literal()),
        None,
        Precedence::None,
    );

    rules[TokenType::Super as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.super_()),
        None,
        Precedence::None,
    );

    rules[TokenType::This as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.this()),
        None,
        Precedence::None,
    );

    rules
};

fn identifier_equal(left: &Token, right: &Token) -> bool {
    left.token_type == right.token_type && left.value == right.value
}

impl<'a> Parser<'a> {
    pub fn new(
        object_manager: &'a mut ObjectManager,
        intern_strings: &'a mut Table,
    ) -> Box<Parser<'a>> {
        let mut parser = Box::new(Parser {
            current: Token::synthetic(TokenType::Eof, ""),
            previous: Token::synthetic(TokenType::Eof, ""),
            scanner: None,
            has_error: false,
            panic_mode: false,
            compilers: vec![],
            class_compilers: vec![],
            object_manager,
            intern_strings,
            artifacts: CompileArtifacts::default(),
        });
        parser.init_compiler(FunctionType::Script);
        parser
    }

    pub fn compile(&mut self, source: &'a str) -> Option<*mut ObjectFunction> {
        self.scanner = Some(Scanner::new(source));
        self.current = Token::synthetic(TokenType::Eof, "");
        self.previous = Token::synthetic(TokenType::Eof, "");

        self.advance();

        while !self.match_token(TokenType::Eof) {
            self.declaration();
        }

        let function = self.end_compiler();
        if self.has_error {
            None
        } else {
            Some(function)
        }
    }

    /// Serializer inputs; callable once compilation is done.
    pub fn take_artifacts(&mut self) -> CompileArtifacts {
        std::mem::take(&mut self.artifacts)
    }

    fn current_compiler(&self) -> &Compiler<'a> {
        self.compilers.last().expect("No compiler.")
    }

    fn current_compiler_mut(&mut self) -> &mut Compiler<'a> {
        self.compilers.last_mut().expect("No compiler.")
    }

    fn current_function(&self) -> &ObjectFunction {
        unsafe { &*self.current_compiler().function }
    }

    fn current_function_mut(&mut self) -> &mut ObjectFunction {
        unsafe { &mut *self.current_compiler().function }
    }

    fn current_chunk(&self) -> &Chunk {
        &self.current_function().chunk
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        &mut self.current_function_mut().chunk
    }

    fn advance(&mut self) {
        self.previous = self.current.clone();
        loop {
            let scanner = self.scanner.as_mut().expect("Scanner was not initialized.");
            self.current = scanner.scan_token();
            if self.current.token_type != TokenType::Error {
                break;
            }

            self.error_at_current(self.current.value);
        }
    }

    fn match_token(&mut self, token_type: TokenType) -> bool {
        if !self.check(token_type) {
            return false;
        }

        self.advance();
        true
    }

    fn check(&self, token_type: TokenType) -> bool {
        self.current.token_type == token_type
    }

    fn consume(&mut self, token_type: TokenType, message: &str) {
        if self.current.token_type == token_type {
            self.advance();
            return;
        }

        self.error_at_current(message);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk_mut().write(byte, line);
    }

    fn emit_opcode(&mut self, opcode: OpCode) {
        self.emit_byte(opcode.to_byte());
    }

    /// Operand bytes are remembered by offset so the serializer can tell
    /// them apart from opcodes.
    fn emit_operand(&mut self, byte: u8) {
        let offset = self.current_chunk().len();
        self.current_compiler_mut().operand_offsets.insert(offset);
        self.emit_byte(byte);
    }

    fn emit_bytes(&mut self, opcode: OpCode, operand: u8) {
        self.emit_opcode(opcode);
        self.emit_operand(operand);
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_bytes(OpCode::Constant, index);
    }

    fn emit_return(&mut self) {
        if self.current_compiler().function_type == FunctionType::Initializer {
            // An initializer always hands back its receiver.
            self.emit_bytes(OpCode::GetLocal, 0);
        } else {
            self.emit_opcode(OpCode::Nil);
        }
        self.emit_opcode(OpCode::Return);
    }

    fn init_compiler(&mut self, function_type: FunctionType) {
        // Function declarations reach here right after their name token.
        let name = if function_type == FunctionType::Script {
            String::new()
        } else {
            self.previous.value.to_string()
        };
        let (function, _) = self.object_manager.alloc_function(0, name);
        self.artifacts.functions.push(function);

        let mut compiler = Compiler {
            function,
            function_type,
            locals: vec![],
            upvalues: vec![],
            scope_depth: 0,
            operand_offsets: BTreeSet::new(),
        };

        // Slot zero holds the receiver in methods, the called closure
        // everywhere else.
        let slot_zero = if matches!(
            function_type,
            FunctionType::Method | FunctionType::Initializer
        ) {
            Token::synthetic(TokenType::This, "this")
        } else {
            Token::synthetic(TokenType::Eof, "")
        };
        compiler.locals.push(Local {
            name: slot_zero,
            depth: 0,
            is_captured: false,
        });

        self.compilers.push(compiler);
    }

    fn end_compiler(&mut self) -> *mut ObjectFunction {
        self.emit_return();

        if self.current_function().name.is_empty() {
            debug_feature::disassemble_chunk(self, "<script>");
        } else {
            let name = self.current_function().name.clone();
            debug_feature::disassemble_chunk(self, &name);
        }

        let compiler = self.compilers.pop().expect("No compiler.");
        self.artifacts.per_function.insert(
            compiler.function,
            FunctionArtifact {
                operand_offsets: compiler.operand_offsets,
                upvalues: compiler.upvalues,
            },
        );
        compiler.function
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        if let Some(index) = self.current_chunk().find_constant(&value) {
            return index as u8;
        }

        let index = self.current_chunk_mut().add_constant(value);
        if index > u8::MAX.into() {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn identifier_constant(&mut self, name: &Token) -> u8 {
        let value = make_string_value(self.object_manager, self.intern_strings, name.value);
        self.make_constant(value)
    }

    fn declaration(&mut self) {
        if self.match_token(TokenType::Class) {
            self.class_declaration();
        } else if self.match_token(TokenType::Fun) {
            self.function_declaration();
        } else if self.match_token(TokenType::Var) {
            self.variable_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect class name.");
        let class_name = self.previous.clone();
        let name_constant = self.identifier_constant(&class_name);
        self.declare_variable();

        self.emit_bytes(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.class_compilers.push(ClassCompiler {
            has_superclass: false,
        });

        if self.match_token(TokenType::Less) {
            self.consume(TokenType::Identifier, "Expect superclass name.");
            self.variable(false);

            if identifier_equal(&class_name, &self.previous) {
                self.error("A class can't inherit from itself.");
            }

            // `super` lives in its own scope so every method closure can
            // capture it as an upvalue.
            self.begin_scope();
            self.add_local(Token::synthetic(TokenType::Super, "super"));
            self.define_variable(0);

            self.named_variable(class_name.clone(), false);
            self.emit_opcode(OpCode::Inherit);
            self.class_compilers
                .last_mut()
                .expect("No class compiler.")
                .has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenType::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.method();
        }
        self.consume(TokenType::RightBrace, "Expect '}' after class body.");
        self.emit_opcode(OpCode::Pop);

        if self
            .class_compilers
            .last()
            .expect("No class compiler.")
            .has_superclass
        {
            self.end_scope();
        }
        self.class_compilers.pop();
    }

    fn method(&mut self) {
        self.consume(TokenType::Identifier, "Expect method name.");
        let constant = self.identifier_constant(&self.previous.clone());

        let function_type = if self.previous.value == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(function_type);
        self.emit_bytes(OpCode::Method, constant);
    }

    fn function_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // Initialized before the body so the function can recurse.
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, function_type: FunctionType) {
        self.init_compiler(function_type);

        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenType::RightParen) {
            loop {
                if self.current_function().arity >= 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                self.current_function_mut().arity += 1;
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);

                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.");
        self.consume(TokenType::LeftBrace, "Expect '{' before function body.");
        self.block();

        let upvalues = self.current_compiler().upvalues.clone();
        let function = self.end_compiler();

        let constant = self.make_constant(make_object_value(function as *mut Object));
        self.emit_bytes(OpCode::Closure, constant);

        for upvalue in &upvalues {
            self.emit_operand(if upvalue.is_local { 1 } else { 0 });
            self.emit_operand(upvalue.index);
        }
    }

    fn variable_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_token(TokenType::Equal) {
            self.expression();
        } else {
            self.emit_opcode(OpCode::Nil);
        }
        self.consume(
            TokenType::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenType::Identifier, message);

        self.declare_variable();
        if self.current_compiler().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(&self.previous.clone())
    }

    fn declare_variable(&mut self) {
        // Globals are late bound; nothing to track at top level.
        if self.current_compiler().scope_depth == 0 {
            return;
        }

        let variable_name = self.previous.clone();
        let scope_depth = self.current_compiler().scope_depth;
        let mut duplicate = false;
        for local in self.current_compiler().locals.iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }

            if identifier_equal(&variable_name, &local.name) {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }

        self.add_local(variable_name);
    }

    fn add_local(&mut self, variable_name: Token<'a>) {
        if self.current_compiler().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }

        self.current_compiler_mut().locals.push(Local {
            name: variable_name,
            depth: -1,
            is_captured: false,
        });
    }

    fn define_variable(&mut self, global: u8) {
        if self.current_compiler().scope_depth > 0 {
            self.mark_initialized();
            return;
        }

        self.emit_bytes(OpCode::DefineGlobal, global);
    }

    fn mark_initialized(&mut self) {
        let scope_depth = self.current_compiler().scope_depth;
        if scope_depth == 0 {
            return;
        }

        self.current_compiler_mut()
            .locals
            .last_mut()
            .expect("No local to initialize.")
            .depth = scope_depth;
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.clone(), can_assign);
    }

    fn named_variable(&mut self, name: Token<'a>, can_assign: bool) {
        let current_compiler_index = self.compilers.len() - 1;
        let get_op;
        let set_op;
        let arg;

        let local = self.resolve_local(current_compiler_index, &name);
        if local != -1 {
            get_op = OpCode::GetLocal;
            set_op = OpCode::SetLocal;
            arg = local as u8;
        } else {
            let upvalue = self.resolve_upvalue(current_compiler_index, &name);
            if upvalue != -1 {
                get_op = OpCode::GetUpvalue;
                set_op = OpCode::SetUpvalue;
                arg = upvalue as u8;
            } else {
                get_op = OpCode::GetGlobal;
                set_op = OpCode::SetGlobal;
                arg = self.identifier_constant(&name);
            }
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_bytes(set_op, arg);
        } else {
            self.emit_bytes(get_op, arg);
        }
    }

    fn resolve_local(&mut self, compiler_index: usize, name: &Token) -> i32 {
        let mut found = -1;
        let mut uninitialized = false;
        let compiler = &self.compilers[compiler_index];
        for (index, local) in compiler.locals.iter().enumerate().rev() {
            if identifier_equal(name, &local.name) {
                if local.depth == -1 {
                    uninitialized = true;
                }
                found = index as i32;
                break;
            }
        }

        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        found
    }

    fn resolve_upvalue(&mut self, compiler_index: usize, name: &Token) -> i32 {
        if compiler_index == 0 {
            return -1;
        }

        let local = self.resolve_local(compiler_index - 1, name);
        if local != -1 {
            self.compilers[compiler_index - 1].locals[local as usize].is_captured = true;
            return self.add_upvalue(compiler_index, local as u8, true);
        }

        let upvalue = self.resolve_upvalue(compiler_index - 1, name);
        if upvalue != -1 {
            return self.add_upvalue(compiler_index, upvalue as u8, false);
        }

        -1
    }

    fn add_upvalue(&mut self, compiler_index: usize, index: u8, is_local: bool) -> i32 {
        for (existing_index, upvalue) in self.compilers[compiler_index].upvalues.iter().enumerate()
        {
            if upvalue.index == index && upvalue.is_local == is_local {
                return existing_index as i32;
            }
        }

        if self.compilers[compiler_index].upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }

        let compiler = &mut self.compilers[compiler_index];
        compiler.upvalues.push(UpvalueDescriptor { index, is_local });
        let count = compiler.upvalues.len();
        unsafe {
            (*compiler.function).upvalue_count = count as u16;
        }
        (count - 1) as i32
    }

    fn and(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_opcode(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump);
        self.emit_opcode(OpCode::Pop);

        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn statement(&mut self) {
        if self.match_token(TokenType::If) {
            self.if_statement();
        } else if self.match_token(TokenType::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_token(TokenType::While) {
            self.while_statement();
        } else if self.match_token(TokenType::For) {
            self.for_statement();
        } else if self.match_token(TokenType::Return) {
            self.return_statement();
        } else if self.match_token(TokenType::Print) {
            self.print_statement();
        } else {
            self.expression_statement();
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_opcode(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_opcode(OpCode::Pop);

        if self.match_token(TokenType::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    /// Emits the instruction with a two byte placeholder and returns the
    /// offset of the placeholder for later patching.
    fn emit_jump(&mut self, opcode: OpCode) -> usize {
        self.emit_opcode(opcode);
        self.emit_operand(0xff);
        self.emit_operand(0xff);
        self.current_chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // -2 adjusts for the jump operand itself.
        let jump = self.current_chunk().len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }

        // Jump distances go high byte first.
        let chunk = self.current_chunk_mut();
        chunk.write_by_offset(offset, ((jump >> 8) & 0xff) as u8);
        chunk.write_by_offset(offset + 1, (jump & 0xff) as u8);
    }

    fn begin_scope(&mut self) {
        self.current_compiler_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_compiler_mut().scope_depth -= 1;

        loop {
            let scope_depth = self.current_compiler().scope_depth;
            let captured = match self.current_compiler().locals.last() {
                Some(local) if local.depth > scope_depth => local.is_captured,
                _ => break,
            };

            // Captured locals migrate to the heap instead of vanishing.
            if captured {
                self.emit_opcode(OpCode::CloseUpvalue);
            } else {
                self.emit_opcode(OpCode::Pop);
            }
            self.current_compiler_mut().locals.pop();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.declaration();
        }

        self.consume(TokenType::RightBrace, "Expect '}' after block.");
    }

    fn return_statement(&mut self) {
        if self.current_compiler().function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenType::Semicolon) {
            self.emit_return();
        } else {
            if self.current_compiler().function_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }

            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after return value.");
            self.emit_opcode(OpCode::Return);
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit_opcode(OpCode::Print);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().len();

        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_opcode(OpCode::Pop);

        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_opcode(OpCode::Pop);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_opcode(OpCode::Loop);

        // +2 skips over the Loop operand itself.
        let offset = self.current_chunk().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }

        self.emit_operand(((offset >> 8) & 0xff) as u8);
        self.emit_operand((offset & 0xff) as u8);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenType::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenType::Var) {
            self.variable_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().len();
        let mut exit_jump: i32 = -1;
        if !self.match_token(TokenType::Semicolon) {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after loop condition.");

            exit_jump = self.emit_jump(OpCode::JumpIfFalse) as i32;
            self.emit_opcode(OpCode::Pop);
        }

        if !self.match_token(TokenType::RightParen) {
            // The increment runs after the body, so jump over it now and
            // loop back to it from the body.
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().len();
            self.expression();
            self.emit_opcode(OpCode::Pop);
            self.consume(TokenType::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if exit_jump != -1 {
            self.patch_jump(exit_jump as usize);
            self.emit_opcode(OpCode::Pop);
        }
        self.end_scope();
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after expression.");
        self.emit_opcode(OpCode::Pop);
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after expression.");
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn number(&mut self) {
        let value = self.previous.value.parse::<f64>().unwrap_or(0.0);
        self.emit_constant(make_number_value(value));
    }

    fn string(&mut self) {
        // Trim the surrounding quotes.
        let content = &self.previous.value[1..self.previous.value.len() - 1];
        let value = make_string_value(self.object_manager, self.intern_strings, content);
        self.emit_constant(value);
    }

    fn unary(&mut self) {
        let operator_type = self.previous.token_type;

        self.parse_precedence(Precedence::Unary);

        match operator_type {
            TokenType::Bang => self.emit_opcode(OpCode::Not),
            TokenType::Minus => self.emit_opcode(OpCode::Negate),
            _ => unreachable!("Expect unary operator."),
        }
    }

    fn binary(&mut self) {
        let operator_type = self.previous.token_type;
        let rule = &RULES[operator_type as usize];
        self.parse_precedence((rule.precedence as u8 + 1).into());

        match operator_type {
            TokenType::BangEqual => {
                self.emit_opcode(OpCode::Equal);
                self.emit_opcode(OpCode::Not);
            }
            TokenType::EqualEqual => self.emit_opcode(OpCode::Equal),
            TokenType::Greater => self.emit_opcode(OpCode::Greater),
            TokenType::GreaterEqual => {
                self.emit_opcode(OpCode::Less);
                self.emit_opcode(OpCode::Not);
            }
            TokenType::Less => self.emit_opcode(OpCode::Less),
            TokenType::LessEqual => {
                self.emit_opcode(OpCode::Greater);
                self.emit_opcode(OpCode::Not);
            }
            TokenType::Plus => self.emit_opcode(OpCode::Add),
            TokenType::Minus => self.emit_opcode(OpCode::Subtract),
            TokenType::Star => self.emit_opcode(OpCode::Multiply),
            TokenType::Slash => self.emit_opcode(OpCode::Divide),
            _ => unreachable!("Unexpected binary operator: {}", operator_type),
        }
    }

    fn literal(&mut self) {
        match self.previous.token_type {
            TokenType::False => self.emit_opcode(OpCode::False),
            TokenType::True => self.emit_opcode(OpCode::True),
            TokenType::Nil => self.emit_opcode(OpCode::Nil),
            _ => unreachable!("Unexpected literal: {}", self.previous.token_type),
        }
    }

    fn call(&mut self) {
        let argument_count = self.argument_list();
        self.emit_bytes(OpCode::Call, argument_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenType::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(&self.previous.clone());

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_bytes(OpCode::SetProperty, name);
        } else if self.match_token(TokenType::LeftParen) {
            // Calling right through the access skips the bound method.
            let argument_count = self.argument_list();
            self.emit_bytes(OpCode::Invoke, name);
            self.emit_operand(argument_count);
        } else {
            self.emit_bytes(OpCode::GetProperty, name);
        }
    }

    fn this(&mut self) {
        if self.class_compilers.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }

        self.variable(false);
    }

    fn super_(&mut self) {
        if self.class_compilers.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self
            .class_compilers
            .last()
            .expect("No class compiler.")
            .has_superclass
        {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenType::Dot, "Expect '.' after 'super'.");
        self.consume(TokenType::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(&self.previous.clone());

        self.named_variable(Token::synthetic(TokenType::This, "this"), false);
        if self.match_token(TokenType::LeftParen) {
            let argument_count = self.argument_list();
            self.named_variable(Token::synthetic(TokenType::Super, "super"), false);
            self.emit_bytes(OpCode::SuperInvoke, name);
            self.emit_operand(argument_count);
        } else {
            self.named_variable(Token::synthetic(TokenType::Super, "super"), false);
            self.emit_bytes(OpCode::GetSuper, name);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut argument_count: u32 = 0;
        if !self.check(TokenType::RightParen) {
            loop {
                self.expression();
                if argument_count >= 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argument_count += 1;

                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after arguments.");
        argument_count as u8
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        let can_assign = precedence <= Precedence::Assignment;
        if let Some(prefix) = &RULES[self.previous.token_type as usize].prefix {
            prefix(self, can_assign);
        } else {
            self.error("Expect expression.");
            return;
        }

        while precedence as u8 <= RULES[self.current.token_type as usize].precedence as u8 {
            self.advance();
            if let Some(infix) = &RULES[self.previous.token_type as usize].infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.token_type != TokenType::Eof {
            if self.previous.token_type == TokenType::Semicolon {
                return;
            }

            match self.current.token_type {
                TokenType::Class
                | TokenType::Fun
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => (),
            }

            self.advance();
        }
    }

    fn error(&mut self, message: &str) {
        self.error_at(&self.previous.clone(), message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(&self.current.clone(), message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }

        self.panic_mode = true;
        eprint!("[line {}] Error", token.line);

        match token.token_type {
            TokenType::Eof => eprint!(" at end"),
            TokenType::Error => {}
            _ => eprint!(" at '{}'", token.value),
        }

        eprintln!(": {}", message);
        self.has_error = true;
    }
}

#[cfg(feature = "debug_print_code")]
mod debug_feature {
    use super::*;
    use crate::debug;

    pub fn disassemble_chunk(parser: &Parser, name: &str) {
        if !parser.has_error {
            debug::disassemble_chunk(parser.current_chunk(), name);
        }
    }
}

#[cfg(not(feature = "debug_print_code"))]
mod debug_feature {
    use super::*;

    pub fn disassemble_chunk(_parser: &Parser, _name: &str) {}
}
