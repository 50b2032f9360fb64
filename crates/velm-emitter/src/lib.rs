//! Knockout JavaScript translation of bound expressions.
//!
//! Translation is a pure function of the typed tree, the data context stack
//! and the formatting options; no server code runs here (constant folding
//! happens before translation, never during). View-model frames map to the
//! knockout context (`$data`, `$parent`, `$parents[n]`, `$root`), property
//! reads unwrap observables with `()`, extension parameters carry their own
//! client expressions. Anything the client runtime cannot express fails with
//! a translation error naming the construct.

use thiserror::Error;

use velm_binder::context::DataContextStack;
use velm_binder::typed::{ConversionKind, TypedExpr};
use velm_common::types::{TypeKind, TypeRegistry};
use velm_common::value::Value;
use velm_parser::ast::{BinaryOperator, UnaryOperator};

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("the expression cannot be translated to JavaScript: {construct} is not supported")]
    UnsupportedExpression { construct: String },
}

/// Formatting and safety switches for one translation.
#[derive(Copy, Clone, Debug)]
pub struct JsTranslationOptions {
    /// Guard member and index access against null targets.
    pub null_checks: bool,
    /// Emit formatting whitespace.
    pub nice_mode: bool,
}

impl Default for JsTranslationOptions {
    fn default() -> Self {
        JsTranslationOptions { null_checks: false, nice_mode: true }
    }
}

pub struct JsTranslator<'a> {
    registry: &'a TypeRegistry,
}

// Precedence levels used for parenthesization, scaled the way JavaScript
// groups them. `??` deliberately sits below `||`/`&&` and requires its
// operands parenthesized, since mixing them bare is a syntax error.
const PREC_CONDITIONAL: u8 = 30;
const PREC_COALESCE: u8 = 35;
const PREC_COALESCE_OPERAND: u8 = 65;
const PREC_OR: u8 = 40;
const PREC_AND: u8 = 50;
const PREC_EQUALITY: u8 = 60;
const PREC_RELATIONAL: u8 = 70;
const PREC_ADDITIVE: u8 = 80;
const PREC_MULTIPLICATIVE: u8 = 90;
const PREC_UNARY: u8 = 100;
const PREC_POSTFIX: u8 = 110;
const PREC_PRIMARY: u8 = 120;

impl<'a> JsTranslator<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        JsTranslator { registry }
    }

    pub fn translate(
        &self,
        expr: &TypedExpr,
        context: &DataContextStack,
        options: JsTranslationOptions,
    ) -> Result<String, TranslationError> {
        let mut printer = Printer {
            registry: self.registry,
            root_levels: context.depth(),
            options,
            out: String::new(),
        };
        printer.emit(expr, 0)?;
        Ok(printer.out)
    }
}

struct Printer<'a> {
    registry: &'a TypeRegistry,
    root_levels: usize,
    options: JsTranslationOptions,
    out: String,
}

impl<'a> Printer<'a> {
    fn write(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn write_space(&mut self) {
        if self.options.nice_mode {
            self.out.push(' ');
        }
    }

    fn emit(&mut self, expr: &TypedExpr, min_prec: u8) -> Result<(), TranslationError> {
        let prec = precedence(expr);
        if prec < min_prec {
            self.write("(");
            self.emit_inner(expr)?;
            self.write(")");
        } else {
            self.emit_inner(expr)?;
        }
        Ok(())
    }

    fn emit_inner(&mut self, expr: &TypedExpr) -> Result<(), TranslationError> {
        match expr {
            TypedExpr::Constant { value, ty } => {
                let rendered = self.render_constant(value, *ty)?;
                self.write(&rendered);
                Ok(())
            }

            TypedExpr::ViewModel { ancestor_levels, .. } => {
                self.write(&context_reference(*ancestor_levels, self.root_levels));
                Ok(())
            }

            TypedExpr::ExtensionParameter { client_expression, .. } => {
                self.write(client_expression);
                Ok(())
            }

            TypedExpr::LambdaParameter { name, .. } => {
                self.write(name);
                Ok(())
            }

            TypedExpr::StaticTypeRef { ty } => Err(TranslationError::UnsupportedExpression {
                construct: format!("static type reference '{}'", self.registry.name_of(*ty)),
            }),

            TypedExpr::Member { target, name, .. } => {
                let target_script = self.subexpression(target, PREC_POSTFIX)?;
                let access = member_access(self.registry, target, &target_script, name);
                if self.options.null_checks && !is_context_reference(target) {
                    let guarded = if self.options.nice_mode {
                        format!("({target_script} == null ? null : {access})")
                    } else {
                        format!("({target_script}==null?null:{access})")
                    };
                    self.write(&guarded);
                } else {
                    self.write(&access);
                }
                Ok(())
            }

            TypedExpr::Index { target, index, .. } => {
                let target_script = self.subexpression(target, PREC_POSTFIX)?;
                let index_script = self.subexpression(index, 0)?;
                let access = format!("{target_script}[{index_script}]");
                if self.options.null_checks && !is_context_reference(target) {
                    let guarded = if self.options.nice_mode {
                        format!("({target_script} == null ? null : {access})")
                    } else {
                        format!("({target_script}==null?null:{access})")
                    };
                    self.write(&guarded);
                } else {
                    self.write(&access);
                }
                Ok(())
            }

            TypedExpr::MethodCall { method, .. } => Err(TranslationError::UnsupportedExpression {
                construct: format!("server method call '{}'", method.id),
            }),

            TypedExpr::Invoke { target, arguments, .. } => {
                self.emit(target, PREC_POSTFIX)?;
                self.write("(");
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        self.write(",");
                        self.write_space();
                    }
                    self.emit(argument, 0)?;
                }
                self.write(")");
                Ok(())
            }

            TypedExpr::Binary { operator, left, right, .. } => {
                let (_, left_min, right_min) = binary_precedence(*operator);
                self.emit(left, left_min)?;
                self.write_space();
                self.write(operator_symbol(*operator));
                self.write_space();
                self.emit(right, right_min)
            }

            TypedExpr::Unary { operator, operand, .. } => {
                self.write(match operator {
                    UnaryOperator::Not => "!",
                    UnaryOperator::Negate => "-",
                });
                self.emit(operand, PREC_UNARY)
            }

            TypedExpr::Conditional { condition, when_true, when_false, .. } => {
                self.emit(condition, PREC_COALESCE)?;
                self.write_space();
                self.write("?");
                self.write_space();
                self.emit(when_true, PREC_CONDITIONAL + 1)?;
                self.write_space();
                self.write(":");
                self.write_space();
                self.emit(when_false, PREC_CONDITIONAL)
            }

            TypedExpr::Lambda { parameters, body, .. } => {
                self.write("(");
                for (i, (name, _)) in parameters.iter().enumerate() {
                    if i > 0 {
                        self.write(",");
                        self.write_space();
                    }
                    self.write(name);
                }
                self.write(")");
                self.write_space();
                self.write("=>");
                self.write_space();
                self.emit(body, PREC_CONDITIONAL)
            }

            TypedExpr::Convert { operand, kind, .. } => match kind {
                ConversionKind::Identity | ConversionKind::NumericWiden => {
                    self.emit_inner(operand)
                }
                ConversionKind::ToString => {
                    let inner = self.subexpression(operand, 0)?;
                    self.write(&format!("String({inner})"));
                    Ok(())
                }
            },
        }
    }

    /// Renders a subexpression into a fresh buffer with the same options.
    fn subexpression(&self, expr: &TypedExpr, min_prec: u8) -> Result<String, TranslationError> {
        let mut printer = Printer {
            registry: self.registry,
            root_levels: self.root_levels,
            options: self.options,
            out: String::new(),
        };
        printer.emit(expr, min_prec)?;
        Ok(printer.out)
    }

    fn render_constant(&self, value: &Value, ty: velm_common::types::TypeId) -> Result<String, TranslationError> {
        // Enum constants cross the wire as member names.
        if let (Some(TypeKind::Enum { .. }), Value::Int(i)) = (
            self.registry.get(self.registry.unwrap_nullable(ty)).map(|d| d.kind.clone()),
            value,
        ) {
            let name = self.registry.enum_value_to_string(self.registry.unwrap_nullable(ty), *i);
            return Ok(serde_json::Value::String(name).to_string());
        }
        match value.to_json() {
            Ok(json) => Ok(json.to_string()),
            Err(_) => Err(TranslationError::UnsupportedExpression {
                construct: "a service reference constant".to_string(),
            }),
        }
    }
}

/// Property access over the knockout context: observables unwrap with `()`,
/// array/string `Length` maps to `.length`.
fn member_access(
    registry: &TypeRegistry,
    target: &TypedExpr,
    target_script: &str,
    name: &str,
) -> String {
    let target_type = registry.unwrap_nullable(target.type_of());
    let kind = registry.get(target_type).map(|d| d.kind.clone());
    if name == "Length" && matches!(kind, Some(TypeKind::Array(_)) | Some(TypeKind::String)) {
        return format!("{target_script}.length");
    }
    if matches!(target, TypedExpr::ViewModel { ancestor_levels: 0, .. }) {
        // Properties of the current context bind without the `$data` prefix.
        return format!("{name}()");
    }
    format!("{target_script}.{name}()")
}

fn is_context_reference(expr: &TypedExpr) -> bool {
    matches!(expr, TypedExpr::ViewModel { .. } | TypedExpr::ExtensionParameter { .. })
}

fn context_reference(ancestor_levels: usize, root_levels: usize) -> String {
    if ancestor_levels == 0 {
        "$data".to_string()
    } else if ancestor_levels == 1 {
        "$parent".to_string()
    } else if ancestor_levels == root_levels {
        "$root".to_string()
    } else {
        format!("$parents[{}]", ancestor_levels - 1)
    }
}

fn operator_symbol(operator: BinaryOperator) -> &'static str {
    match operator {
        BinaryOperator::NullCoalesce => "??",
        other => other.symbol(),
    }
}

fn binary_precedence(operator: BinaryOperator) -> (u8, u8, u8) {
    use BinaryOperator as Op;
    match operator {
        Op::NullCoalesce => (PREC_COALESCE, PREC_COALESCE_OPERAND, PREC_COALESCE),
        Op::Or => (PREC_OR, PREC_OR, PREC_OR + 1),
        Op::And => (PREC_AND, PREC_AND, PREC_AND + 1),
        Op::Equal | Op::NotEqual => (PREC_EQUALITY, PREC_EQUALITY, PREC_EQUALITY + 1),
        Op::Less | Op::LessOrEqual | Op::Greater | Op::GreaterOrEqual => {
            (PREC_RELATIONAL, PREC_RELATIONAL, PREC_RELATIONAL + 1)
        }
        Op::Add | Op::Subtract => (PREC_ADDITIVE, PREC_ADDITIVE, PREC_ADDITIVE + 1),
        Op::Multiply | Op::Divide | Op::Modulo => {
            (PREC_MULTIPLICATIVE, PREC_MULTIPLICATIVE, PREC_MULTIPLICATIVE + 1)
        }
    }
}

fn precedence(expr: &TypedExpr) -> u8 {
    match expr {
        TypedExpr::Binary { operator, .. } => binary_precedence(*operator).0,
        TypedExpr::Unary { .. } => PREC_UNARY,
        TypedExpr::Conditional { .. } | TypedExpr::Lambda { .. } => PREC_CONDITIONAL,
        TypedExpr::Member { .. } | TypedExpr::Index { .. } | TypedExpr::Invoke { .. } => {
            PREC_POSTFIX
        }
        TypedExpr::Convert { operand, .. } => precedence(operand),
        _ => PREC_PRIMARY,
    }
}
