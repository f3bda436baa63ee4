//! Operations for tensors.
//!
//! Every operation allocates a fresh, row-major result with the left operand's
//! allocator. Inputs may be arbitrary views: contiguous operands are combined
//! position by position in storage, anything else is walked by logical index.
//! When an input requires gradients the result records a
//! [`Node`](crate::autograd::Node).

use crate::{
    allocator::TensorAllocator,
    autograd::{record, OpKind},
    tensor::{Tensor, TensorError},
};

fn binary<A, F>(op: OpKind, lhs: &Tensor<A>, rhs: &Tensor<A>, f: F) -> Result<Tensor<A>, TensorError>
where
    A: TensorAllocator,
    F: Fn(f32, f32) -> f32,
{
    let mut out = lhs.zip_with(op.name(), rhs, f)?;
    record(op, &[lhs, rhs], &mut out);
    Ok(out)
}

fn unary<A, F>(op: OpKind, input: &Tensor<A>, f: F) -> Tensor<A>
where
    A: TensorAllocator,
    F: Fn(f32) -> f32,
{
    let mut out = input.map(f);
    record(op, &[input], &mut out);
    out
}

/// Add two tensors.
///
/// # Arguments
///
/// * `lhs` - Left-hand side tensor.
/// * `rhs` - Right-hand side tensor.
///
/// # Returns
///
/// A new `Tensor` instance with the sum of the two tensors.
///
/// # Errors
///
/// Returns [`TensorError::DimensionMismatch`] if the shapes differ.
pub fn add<A: TensorAllocator>(lhs: &Tensor<A>, rhs: &Tensor<A>) -> Result<Tensor<A>, TensorError> {
    binary(OpKind::Add, lhs, rhs, |a, b| a + b)
}

/// Subtract two tensors.
///
/// # Arguments
///
/// * `lhs` - Left-hand side tensor.
/// * `rhs` - Right-hand side tensor.
///
/// # Returns
///
/// A new `Tensor` instance with the difference of the two tensors.
pub fn sub<A: TensorAllocator>(lhs: &Tensor<A>, rhs: &Tensor<A>) -> Result<Tensor<A>, TensorError> {
    binary(OpKind::Sub, lhs, rhs, |a, b| a - b)
}

/// Multiply two tensors element-wise.
///
/// # Arguments
///
/// * `lhs` - Left-hand side tensor.
/// * `rhs` - Right-hand side tensor.
///
/// # Returns
///
/// A new `Tensor` instance with the product of the two tensors.
pub fn mul<A: TensorAllocator>(lhs: &Tensor<A>, rhs: &Tensor<A>) -> Result<Tensor<A>, TensorError> {
    binary(OpKind::Mul, lhs, rhs, |a, b| a * b)
}

/// Divide two tensors element-wise.
///
/// Division by zero follows IEEE 754 and yields infinities or NaN.
pub fn div<A: TensorAllocator>(lhs: &Tensor<A>, rhs: &Tensor<A>) -> Result<Tensor<A>, TensorError> {
    binary(OpKind::Div, lhs, rhs, |a, b| a / b)
}

/// Add a scalar to every element.
///
/// # Example
///
/// ```
/// use strided_tensor::{ops, CpuAllocator, Tensor};
///
/// let t = Tensor::arange(3, CpuAllocator).unwrap();
/// assert_eq!(ops::add_scalar(&t, 0.5).to_vec(), vec![0.5, 1.5, 2.5]);
/// ```
pub fn add_scalar<A: TensorAllocator>(tensor: &Tensor<A>, scalar: f32) -> Tensor<A> {
    unary(OpKind::AddScalar(scalar), tensor, |x| x + scalar)
}

/// Multiply every element by a scalar.
pub fn mul_scalar<A: TensorAllocator>(tensor: &Tensor<A>, scalar: f32) -> Tensor<A> {
    unary(OpKind::MulScalar(scalar), tensor, |x| x * scalar)
}
