//! Syntactical analysis: groups the token stream into functions and
//! constant labels.
//!
//! The grammar is line-oriented inside function bodies: every instruction
//! occupies one source line. Top-level items:
//!
//! ```text
//! .function: [[attr]]* <name>
//!     <mnemonic> <operand> (, <operand>)*
//!     ...
//! .end
//!
//! .label: [[attr]]* <name> (string | atom) <body tokens...>
//! ```

use crate::asm::lexer::{Location, Token, TokenKind};
use crate::errors::AsmError;

/// Type tag of a constant label.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LabelType {
    String,
    Atom,
}

/// A function definition.
#[derive(Clone, Debug)]
pub struct FnDef {
    pub name: Token,
    pub attributes: Vec<String>,
    pub instructions: Vec<SourceInstruction>,
    pub start: Location,
    pub end: Location,
}

impl FnDef {
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a == name)
    }
}

/// A constant label definition.
#[derive(Clone, Debug)]
pub struct LabelDef {
    pub name: Token,
    pub attributes: Vec<String>,
    pub label_type: LabelType,
    /// The raw body tokens; interpreted by the constant-pool stage.
    pub value: Vec<Token>,
    pub start: Location,
}

impl LabelDef {
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a == name)
    }
}

/// Top-level AST node.
#[derive(Clone, Debug)]
pub enum Node {
    Function(FnDef),
    Label(LabelDef),
}

/// One source instruction: a mnemonic and its raw operand tokens.
///
/// The `g.` greedy prefix is stripped from `mnemonic` and recorded in
/// `greedy`. `physical_index` is the source line the instruction came
/// from, kept through expansion for diagnostics.
#[derive(Clone, Debug)]
pub struct SourceInstruction {
    pub mnemonic: String,
    pub greedy: bool,
    pub operands: Vec<Token>,
    pub location: Location,
    pub physical_index: usize,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Result<Token, AsmError> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(AsmError::UnexpectedToken {
                line: token.location.line,
                column: token.location.column,
                offset: token.location.offset,
                expected,
                actual: token.text,
            }),
            None => Err(AsmError::UnexpectedEndOfInput { expected }),
        }
    }

    /// Collects zero or more `[[attr]]` tokens.
    fn attributes(&mut self) -> Vec<String> {
        let mut attrs = Vec::new();
        while let Some(token) = self.peek() {
            if token.kind != TokenKind::Attribute {
                break;
            }
            attrs.push(token.text.clone());
            self.pos += 1;
        }
        attrs
    }

    fn function(&mut self, start: Location) -> Result<FnDef, AsmError> {
        let attributes = self.attributes();
        let name = self.expect(TokenKind::Name, "a function name")?;

        let mut instructions = Vec::new();
        let end;
        loop {
            match self.peek() {
                None => {
                    return Err(AsmError::UnexpectedEndOfInput {
                        expected: ".end closing the function",
                    });
                }
                Some(token) if token.kind == TokenKind::Directive => {
                    let token = self.next().unwrap_or_else(|| unreachable!());
                    if token.text != ".end" {
                        return Err(AsmError::UnexpectedToken {
                            line: token.location.line,
                            column: token.location.column,
                            offset: token.location.offset,
                            expected: ".end closing the function",
                            actual: token.text,
                        });
                    }
                    end = token.location;
                    break;
                }
                Some(_) => instructions.push(self.instruction()?),
            }
        }

        Ok(FnDef {
            name,
            attributes,
            instructions,
            start,
            end,
        })
    }

    /// Parses one instruction: a mnemonic plus every following token on
    /// the same source line.
    fn instruction(&mut self) -> Result<SourceInstruction, AsmError> {
        let head = self.expect(TokenKind::Name, "an instruction mnemonic")?;
        let line = head.location.line;

        let (mnemonic, greedy) = match head.text.strip_prefix("g.") {
            Some(rest) => (rest.to_string(), true),
            None => (head.text.clone(), false),
        };

        let mut operands = Vec::new();
        while let Some(token) = self.peek() {
            if token.location.line != line {
                break;
            }
            let token = self.next().unwrap_or_else(|| unreachable!());
            if token.kind == TokenKind::Comma {
                continue;
            }
            operands.push(token);
        }

        Ok(SourceInstruction {
            mnemonic,
            greedy,
            operands,
            location: head.location,
            physical_index: line,
        })
    }

    fn label(&mut self, start: Location) -> Result<LabelDef, AsmError> {
        let attributes = self.attributes();
        let name = self.expect(TokenKind::Name, "a label name")?;

        // An extern label has no body, not even a type tag on some
        // declarations; default those to string.
        let line = name.location.line;
        let label_type = match self.peek() {
            Some(token) if token.location.line == line && token.kind == TokenKind::Name => {
                let token = self.next().unwrap_or_else(|| unreachable!());
                match token.text.as_str() {
                    "string" => LabelType::String,
                    "atom" => LabelType::Atom,
                    _ => {
                        return Err(AsmError::UnexpectedToken {
                            line: token.location.line,
                            column: token.location.column,
                            offset: token.location.offset,
                            expected: "a label type (string or atom)",
                            actual: token.text,
                        });
                    }
                }
            }
            _ => LabelType::String,
        };

        let mut value = Vec::new();
        while let Some(token) = self.peek() {
            if token.location.line != line {
                break;
            }
            let token = self.next().unwrap_or_else(|| unreachable!());
            if token.kind == TokenKind::Comma {
                continue;
            }
            value.push(token);
        }

        Ok(LabelDef {
            name,
            attributes,
            label_type,
            value,
            start,
        })
    }
}

/// Parses the token stream into top-level nodes.
///
/// Duplicated `[[entry_point]]` attributes across functions are detected
/// here and reported against the second function.
pub fn parse(tokens: Vec<Token>) -> Result<Vec<Node>, AsmError> {
    let mut parser = Parser { tokens, pos: 0 };
    let mut nodes = Vec::new();
    let mut entry_point: Option<String> = None;

    while let Some(token) = parser.peek() {
        let location = token.location;
        let kind = token.kind;
        let text = token.text.clone();
        match (kind, text.as_str()) {
            (TokenKind::Directive, ".function:") => {
                parser.pos += 1;
                let fn_def = parser.function(location)?;
                if fn_def.has_attr("entry_point") {
                    if let Some(first) = &entry_point {
                        return Err(AsmError::DuplicateEntryPoint {
                            line: fn_def.name.location.line,
                            column: fn_def.name.location.column,
                            offset: fn_def.name.location.offset,
                            function: fn_def.name.text.clone(),
                            first: first.clone(),
                        });
                    }
                    entry_point = Some(fn_def.name.text.clone());
                }
                nodes.push(Node::Function(fn_def));
            }
            (TokenKind::Directive, ".label:") => {
                parser.pos += 1;
                let label = parser.label(location)?;
                nodes.push(Node::Label(label));
            }
            _ => {
                return Err(AsmError::UnexpectedToken {
                    line: location.line,
                    column: location.column,
                    offset: location.offset,
                    expected: ".function: or .label:",
                    actual: text,
                });
            }
        }
    }

    Ok(nodes)
}
