//! Well-known op types and their default op-pattern tags
//!
//! Graph producers usually tag nodes themselves; [`classify_op`] gives the
//! tag an op type gets when they do not.

use crate::graph::OpPattern;

/// Layout transform
pub const TRANS_DATA: &str = "TransData";

/// Data type conversion
pub const CAST: &str = "Cast";

/// Constant producer
pub const CONST: &str = "Const";

/// Unary element-wise operations
pub const ELEMWISE_OPS: &[&str] = &[
    "Relu", "Relu6", "Sigmoid", "Tanh", "Exp", "Log", "Abs", "Neg", "Sqrt", "Rsqrt", "Gelu",
    "LeakyRelu", "Cast",
];

/// Binary operations with implicit broadcast
pub const BROADCAST_OPS: &[&str] = &[
    "Add", "Sub", "Mul", "RealDiv", "Div", "Pow", "Maximum", "Minimum", "BiasAdd",
];

/// Reductions
pub const REDUCE_OPS: &[&str] = &["ReduceSum", "ReduceMean", "ReduceMax", "ReduceMin", "ReduceProd"];

/// Convolution-like operations
pub const CONV_OPS: &[&str] = &["Conv2D", "Conv3D", "DepthwiseConv2D", "Conv2DTranspose"];

/// Matrix multiplications
pub const MATMUL_OPS: &[&str] = &["MatMul", "MatMulV2", "BatchMatMul", "FullyConnection"];

/// Pooling operations
pub const POOL_OPS: &[&str] = &["MaxPool", "AvgPool", "Pooling"];

/// Quantize
pub const QUANT_OPS: &[&str] = &["AscendQuant"];

/// Dequantize
pub const DEQUANT_OPS: &[&str] = &["AscendDequant"];

/// Requantize
pub const REQUANT_OPS: &[&str] = &["AscendRequant"];

/// Default op-pattern tag for an op type
pub fn classify_op(op_type: &str) -> OpPattern {
    let tables: [(&[&str], OpPattern); 9] = [
        (ELEMWISE_OPS, OpPattern::ElemWise),
        (BROADCAST_OPS, OpPattern::Broadcast),
        (REDUCE_OPS, OpPattern::Reduce),
        (CONV_OPS, OpPattern::Convolution),
        (MATMUL_OPS, OpPattern::MatMul),
        (POOL_OPS, OpPattern::Pool),
        (QUANT_OPS, OpPattern::Quant),
        (DEQUANT_OPS, OpPattern::Dequant),
        (REQUANT_OPS, OpPattern::Requant),
    ];
    tables
        .into_iter()
        .find(|(ops, _)| ops.contains(&op_type))
        .map(|(_, pattern)| pattern)
        .unwrap_or(OpPattern::Opaque)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_op() {
        assert_eq!(classify_op("Relu"), OpPattern::ElemWise);
        assert_eq!(classify_op("Add"), OpPattern::Broadcast);
        assert_eq!(classify_op("ReduceMean"), OpPattern::Reduce);
        assert_eq!(classify_op("Conv2D"), OpPattern::Convolution);
        assert_eq!(classify_op("BatchMatMul"), OpPattern::MatMul);
        assert_eq!(classify_op("MaxPool"), OpPattern::Pool);
        assert_eq!(classify_op("AscendDequant"), OpPattern::Dequant);
        assert_eq!(classify_op(TRANS_DATA), OpPattern::Opaque);
        assert_eq!(classify_op("CustomOp"), OpPattern::Opaque);
    }
}
