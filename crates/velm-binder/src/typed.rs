//! The typed expression tree produced by binding.

use std::sync::Arc;

use velm_common::types::{MethodDescriptor, TypeId};
use velm_common::value::Value;

use velm_parser::ast::{BinaryOperator, UnaryOperator};

/// How a `Convert` node changes its operand.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConversionKind {
    /// Representation does not change (upcast, boxing, nullable wrap).
    Identity,
    /// Integer widening to double.
    NumericWiden,
    /// Render as string; only applied when explicitly allowed.
    ToString,
}

#[derive(Clone, Debug)]
pub enum TypedExpr {
    Constant {
        value: Value,
        ty: TypeId,
    },
    /// The view model `ancestor_levels` frames above the current one
    /// (0 = `_this`).
    ViewModel {
        ancestor_levels: usize,
        ty: TypeId,
    },
    ExtensionParameter {
        name: String,
        ancestor_levels: usize,
        ty: TypeId,
        client_expression: String,
    },
    /// A reference to a lambda parameter of an enclosing `Lambda` node.
    LambdaParameter {
        name: String,
        ty: TypeId,
    },
    /// A static type used as a member-access target; never a value.
    StaticTypeRef {
        ty: TypeId,
    },
    Member {
        target: Box<TypedExpr>,
        name: String,
        ty: TypeId,
    },
    Index {
        target: Box<TypedExpr>,
        index: Box<TypedExpr>,
        ty: TypeId,
    },
    MethodCall {
        method: Arc<MethodDescriptor>,
        /// `None` for static methods.
        target: Option<Box<TypedExpr>>,
        arguments: Vec<TypedExpr>,
        ty: TypeId,
    },
    /// Invocation of a delegate-typed expression (usually a lambda).
    Invoke {
        target: Box<TypedExpr>,
        arguments: Vec<TypedExpr>,
        ty: TypeId,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
        ty: TypeId,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<TypedExpr>,
        ty: TypeId,
    },
    Conditional {
        condition: Box<TypedExpr>,
        when_true: Box<TypedExpr>,
        when_false: Box<TypedExpr>,
        ty: TypeId,
    },
    Lambda {
        parameters: Vec<(String, TypeId)>,
        body: Box<TypedExpr>,
        /// The delegate type of the whole lambda.
        ty: TypeId,
    },
    Convert {
        operand: Box<TypedExpr>,
        to: TypeId,
        kind: ConversionKind,
    },
}

impl TypedExpr {
    pub fn type_of(&self) -> TypeId {
        match self {
            TypedExpr::Constant { ty, .. }
            | TypedExpr::ViewModel { ty, .. }
            | TypedExpr::ExtensionParameter { ty, .. }
            | TypedExpr::LambdaParameter { ty, .. }
            | TypedExpr::StaticTypeRef { ty }
            | TypedExpr::Member { ty, .. }
            | TypedExpr::Index { ty, .. }
            | TypedExpr::MethodCall { ty, .. }
            | TypedExpr::Invoke { ty, .. }
            | TypedExpr::Binary { ty, .. }
            | TypedExpr::Unary { ty, .. }
            | TypedExpr::Conditional { ty, .. }
            | TypedExpr::Lambda { ty, .. } => *ty,
            TypedExpr::Convert { to, .. } => *to,
        }
    }

    /// Short name of the node kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TypedExpr::Constant { .. } => "constant",
            TypedExpr::ViewModel { .. } => "view model reference",
            TypedExpr::ExtensionParameter { .. } => "extension parameter",
            TypedExpr::LambdaParameter { .. } => "lambda parameter",
            TypedExpr::StaticTypeRef { .. } => "static type reference",
            TypedExpr::Member { .. } => "member access",
            TypedExpr::Index { .. } => "indexer",
            TypedExpr::MethodCall { .. } => "method call",
            TypedExpr::Invoke { .. } => "delegate invocation",
            TypedExpr::Binary { .. } => "binary expression",
            TypedExpr::Unary { .. } => "unary expression",
            TypedExpr::Conditional { .. } => "conditional expression",
            TypedExpr::Lambda { .. } => "lambda",
            TypedExpr::Convert { .. } => "conversion",
        }
    }

    /// True when evaluating the expression cannot observe or cause side
    /// effects. Method and delegate calls are treated as impure.
    pub fn is_pure(&self) -> bool {
        match self {
            TypedExpr::Constant { .. }
            | TypedExpr::ViewModel { .. }
            | TypedExpr::ExtensionParameter { .. }
            | TypedExpr::LambdaParameter { .. }
            | TypedExpr::StaticTypeRef { .. } => true,
            TypedExpr::Member { target, .. } => target.is_pure(),
            TypedExpr::Index { target, index, .. } => target.is_pure() && index.is_pure(),
            TypedExpr::MethodCall { .. } | TypedExpr::Invoke { .. } => false,
            TypedExpr::Binary { left, right, .. } => left.is_pure() && right.is_pure(),
            TypedExpr::Unary { operand, .. } => operand.is_pure(),
            TypedExpr::Conditional { condition, when_true, when_false, .. } => {
                condition.is_pure() && when_true.is_pure() && when_false.is_pure()
            }
            TypedExpr::Lambda { .. } => true,
            TypedExpr::Convert { operand, .. } => operand.is_pure(),
        }
    }
}
