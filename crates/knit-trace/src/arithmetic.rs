//! Bundle arithmetic.
//!
//! Expressions combine traced trees with `+` (add), `-` (subtract) and `&`
//! (intersect):
//!
//! ```text
//! app/main.js + app/admin.js - [app/config.js] - (vendor/*.js & app/lazy.js)
//! ```
//!
//! Operators are whitespace delimited and the first term defaults to `+`.
//! `[name]` stands for the single record of `name` rather than its whole tree.
//! Operands containing `*` expand to one operation per matching file.
//! Operations fold left to right starting from an empty tree.

use std::path::Path;

use futures::FutureExt;
use futures::future::BoxFuture;
use knit_graph::paths::{file_url_to_path, path_to_file_url};
use knit_graph::{GraphError, ResolvedTree, add, intersect, subtract};

use crate::error::{Result, TraceError};
use crate::runtime::glob_files;
use crate::trace::{TraceOptions, Tracer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
    Intersect,
}

impl Operator {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "+" => Some(Operator::Add),
            "-" => Some(Operator::Subtract),
            "&" => Some(Operator::Intersect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// A module name. `single` selects only the module's own record.
    Module { name: String, single: bool },
    /// A parenthesized sub-expression.
    Group(Vec<Operation>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub operator: Operator,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Operator(Operator),
    Module { name: String, single: bool },
}

fn algebra_error(message: impl Into<String>) -> TraceError {
    TraceError::Graph(GraphError::Algebra(message.into()))
}

fn tokenize(expression: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '[' => {
                chars.next();
                let rest = &expression[start + 1..];
                let end = rest
                    .find(']')
                    .ok_or_else(|| algebra_error(format!("Unbalanced `[` in `{}`", expression)))?;
                let name = rest[..end].trim();
                if name.is_empty() {
                    return Err(algebra_error(format!("Empty `[]` in `{}`", expression)));
                }
                tokens.push(Token::Module {
                    name: name.to_string(),
                    single: true,
                });
                while chars.next_if(|&(index, _)| index <= start + 1 + end).is_some() {}
            }
            ']' => {
                return Err(algebra_error(format!("Unbalanced `]` in `{}`", expression)));
            }
            _ => {
                let mut end = expression.len();
                while let Some(&(index, c)) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']') {
                        end = index;
                        break;
                    }
                    chars.next();
                }
                let word = &expression[start..end];
                tokens.push(match Operator::parse(word) {
                    Some(operator) => Token::Operator(operator),
                    None => Token::Module {
                        name: word.to_string(),
                        single: false,
                    },
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Token>,
    position: usize,
}

impl Parser<'_> {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn sequence(&mut self, nested: bool) -> Result<Vec<Operation>> {
        let mut operations = Vec::new();
        loop {
            let operator = match self.peek() {
                None if nested => {
                    return Err(algebra_error(format!("Unbalanced `(` in `{}`", self.expression)));
                }
                None => break,
                Some(Token::Close) if nested => {
                    self.position += 1;
                    break;
                }
                Some(Token::Close) => {
                    return Err(algebra_error(format!("Unbalanced `)` in `{}`", self.expression)));
                }
                Some(Token::Operator(operator)) => {
                    let operator = *operator;
                    self.position += 1;
                    operator
                }
                Some(Token::Module { name, .. }) if !operations.is_empty() => {
                    return Err(algebra_error(format!(
                        "Unknown operator `{}` in `{}`",
                        name, self.expression
                    )));
                }
                Some(_) => Operator::Add,
            };

            let operand = match self.next() {
                Some(Token::Module { name, single }) => Operand::Module { name, single },
                Some(Token::Open) => Operand::Group(self.sequence(true)?),
                _ => {
                    return Err(algebra_error(format!(
                        "Missing operand in `{}`",
                        self.expression
                    )));
                }
            };
            operations.push(Operation { operator, operand });
        }

        if operations.is_empty() {
            return Err(algebra_error(format!(
                "Missing operand in `{}`",
                self.expression
            )));
        }
        Ok(operations)
    }
}

/// Parse and validate an expression without touching the file system.
pub fn parse_expression(expression: &str) -> Result<Vec<Operation>> {
    let mut parser = Parser {
        expression,
        tokens: tokenize(expression)?,
        position: 0,
    };
    let operations = parser.sequence(false)?;
    validate(&operations)?;
    Ok(operations)
}

fn validate(operations: &[Operation]) -> Result<()> {
    for operation in operations {
        match &operation.operand {
            Operand::Module { single: true, .. } if operation.operator == Operator::Intersect => {
                return Err(algebra_error("Single modules cannot be intersected."));
            }
            Operand::Group(inner) => validate(inner)?,
            Operand::Module { .. } => {}
        }
    }
    Ok(())
}

/// Replace glob operands with one operation per matching file.
pub fn expand_globs<'a>(
    tracer: &'a Tracer,
    operations: Vec<Operation>,
) -> BoxFuture<'a, Result<Vec<Operation>>> {
    async move {
        let mut expanded = Vec::with_capacity(operations.len());
        for operation in operations {
            match operation.operand {
                Operand::Module { name, single } if name.contains('*') => {
                    for name in glob_module(tracer, &name).await? {
                        expanded.push(Operation {
                            operator: operation.operator,
                            operand: Operand::Module { name, single },
                        });
                    }
                }
                Operand::Group(inner) => expanded.push(Operation {
                    operator: operation.operator,
                    operand: Operand::Group(expand_globs(tracer, inner).await?),
                }),
                operand => expanded.push(Operation {
                    operator: operation.operator,
                    operand,
                }),
            }
        }
        Ok(expanded)
    }
    .boxed()
}

/// Canonical names of the files matching a glob module name.
async fn glob_module(tracer: &Tracer, pattern: &str) -> Result<Vec<String>> {
    let canonicalizer = tracer.canonicalizer();
    let address = canonicalizer.decanonicalize(pattern);
    let path = file_url_to_path(&address)
        .map(|path| path.to_string_lossy().into_owned())
        .ok_or_else(|| algebra_error(format!("Cannot glob {}: not a file: address", address)))?;

    let star = path.find('*').unwrap_or(path.len());
    let dir_end = path[..star].rfind('/').map_or(0, |index| index + 1);
    let files = glob_files(
        tracer.runtime().as_ref(),
        Path::new(&path[..dir_end]),
        &path[dir_end..],
    )
    .await?;
    if files.is_empty() {
        return Err(algebra_error(format!("No files match {}", pattern)));
    }

    let mut names = Vec::with_capacity(files.len());
    for file in files {
        names.push(canonicalizer.canonicalize(&path_to_file_url(&file), false)?);
    }
    Ok(names)
}

/// Fold the operations left to right from an empty tree.
pub fn evaluate<'a>(
    tracer: &'a Tracer,
    operations: &'a [Operation],
    options: &'a TraceOptions,
) -> BoxFuture<'a, Result<ResolvedTree>> {
    async move {
        let mut tree = ResolvedTree::new();
        for operation in operations {
            let operand = match &operation.operand {
                Operand::Module { name, single: false } => {
                    let canonical = tracer.canonical_name(name).await?;
                    tracer.trace_module(&canonical, options).await?
                }
                Operand::Module { name, single: true } => {
                    let canonical = tracer.canonical_name(name).await?;
                    let entry = tracer.get_load_record(&canonical).await?;
                    ResolvedTree::from_iter([(canonical, entry)])
                }
                Operand::Group(inner) => evaluate(tracer, inner, options).await?,
            };
            tree = match operation.operator {
                Operator::Add => add(&tree, &operand),
                Operator::Subtract => subtract(&tree, &operand),
                Operator::Intersect => intersect(&tree, &operand),
            };
        }
        Ok(tree)
    }
    .boxed()
}

/// Parse, expand and evaluate an arithmetic expression.
pub async fn trace_expression(
    tracer: &Tracer,
    expression: &str,
    options: &TraceOptions,
) -> Result<ResolvedTree> {
    let operations = parse_expression(expression)?;
    let operations = expand_globs(tracer, operations).await?;
    evaluate(tracer, &operations, options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str, single: bool) -> Operand {
        Operand::Module {
            name: name.to_string(),
            single,
        }
    }

    #[test]
    fn test_parse_defaults_first_operator_to_add() {
        let operations = parse_expression("amd-1.js - [amd.js]").unwrap();
        assert_eq!(
            operations,
            vec![
                Operation {
                    operator: Operator::Add,
                    operand: module("amd-1.js", false),
                },
                Operation {
                    operator: Operator::Subtract,
                    operand: module("amd.js", true),
                },
            ]
        );
    }

    #[test]
    fn test_parse_groups() {
        let operations = parse_expression("a.js + (b.js & c.js) - [d.js]").unwrap();
        assert_eq!(operations.len(), 3);
        assert_eq!(
            operations[1].operand,
            Operand::Group(vec![
                Operation {
                    operator: Operator::Add,
                    operand: module("b.js", false),
                },
                Operation {
                    operator: Operator::Intersect,
                    operand: module("c.js", false),
                },
            ])
        );
    }

    #[test]
    fn test_leading_operator() {
        let operations = parse_expression("- [a.js]").unwrap();
        assert_eq!(operations[0].operator, Operator::Subtract);
    }

    #[test]
    fn test_parse_errors() {
        for expression in [
            "",
            "a.js +",
            "a.js + + b.js",
            "a.js | b.js",
            "a.js b.js",
            "(a.js + b.js",
            "a.js + b.js)",
            "[a.js",
            "a.js - []",
            "a.js + ()",
        ] {
            let err = parse_expression(expression).unwrap_err();
            assert!(
                matches!(err, TraceError::Graph(GraphError::Algebra(_))),
                "{}: {:?}",
                expression,
                err
            );
        }
    }

    #[test]
    fn test_single_module_intersection_rejected() {
        let err = parse_expression("a.js + (b.js & [c.js])").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Tree algebra error: Single modules cannot be intersected."
        );
    }
}
