//! Differentiation hook.
//!
//! Operations attach a [`Node`] to their result when an input requires
//! gradients. The crate records the graph but never traverses it; a backward
//! pass belongs to an external autograd engine, which dispatches on
//! [`OpKind`].

use std::rc::Rc;

use crate::{allocator::TensorAllocator, tensor::Tensor, CpuAllocator};

/// The operation that produced a tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpKind {
    /// Elementwise `lhs + rhs`.
    Add,
    /// Elementwise `lhs - rhs`.
    Sub,
    /// Elementwise `lhs * rhs`.
    Mul,
    /// Elementwise `lhs / rhs`.
    Div,
    /// `input + scalar`.
    AddScalar(f32),
    /// `input * scalar`.
    MulScalar(f32),
}

impl OpKind {
    /// Returns the operation name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::AddScalar(_) => "add_scalar",
            Self::MulScalar(_) => "mul_scalar",
        }
    }

    /// Returns the number of tensor inputs the operation consumes.
    pub fn arity(&self) -> usize {
        match self {
            Self::Add | Self::Sub | Self::Mul | Self::Div => 2,
            Self::AddScalar(_) | Self::MulScalar(_) => 1,
        }
    }
}

/// A recorded operation in the computation graph.
///
/// Inputs are held as tensor views, so they keep their storage alive for as long
/// as the node exists. The output is recorded by shape only: the output tensor
/// owns this node, and a strong reference back to it would never be freed.
pub struct Node<A: TensorAllocator = CpuAllocator> {
    op: OpKind,
    inputs: Vec<Tensor<A>>,
    output_shape: Vec<usize>,
}

impl<A: TensorAllocator> Node<A> {
    /// Creates a node for `op` applied to `inputs`.
    pub(crate) fn new(op: OpKind, inputs: Vec<Tensor<A>>, output_shape: Vec<usize>) -> Self {
        debug_assert_eq!(inputs.len(), op.arity());
        Self {
            op,
            inputs,
            output_shape,
        }
    }

    /// The operation that produced the output.
    pub fn op(&self) -> OpKind {
        self.op
    }

    /// The operands, in call order.
    pub fn inputs(&self) -> &[Tensor<A>] {
        &self.inputs
    }

    /// Shape of the produced tensor.
    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }
}

impl<A: TensorAllocator> std::fmt::Debug for Node<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let input_shapes: Vec<&[usize]> = self.inputs.iter().map(|t| t.shape()).collect();
        f.debug_struct("Node")
            .field("op", &self.op)
            .field("inputs", &input_shapes)
            .field("output_shape", &self.output_shape)
            .finish()
    }
}

/// Attaches a node to `output` if any input requires gradients.
pub(crate) fn record<A: TensorAllocator>(op: OpKind, inputs: &[&Tensor<A>], output: &mut Tensor<A>) {
    if !inputs.iter().any(|t| t.requires_grad()) {
        return;
    }
    let node = Node::new(
        op,
        inputs.iter().map(|&t| t.clone()).collect(),
        output.shape().to_vec(),
    );
    output.grad_fn = Some(Rc::new(node));
    output.requires_grad = true;
    output.is_leaf = false;
}
