//! Node, port and attribute types of the compute graph

use std::fmt;

use ndarray::ArrayD;
use smallvec::SmallVec;

use super::maps::AttrMap;

/// Attribute key holding the fusion scope a node belongs to
pub const ATTR_SCOPE_ID: &str = "_fusion_scope";
/// Attribute key naming the pass that fused the node
pub const ATTR_PASS_NAME: &str = "_fusion_pass";
/// Attribute key recording how often a producer is recomputed by duplication
pub const ATTR_DUP_COUNT: &str = "_dup_count";

/// Stable identifier of a node inside one [`ComputeGraph`](super::ComputeGraph)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Raw index value
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// An output data port: producer node plus output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPort {
    /// Producer node
    pub node: NodeId,
    /// Output index on the producer
    pub index: usize,
}

impl OutPort {
    /// Create a new output port reference
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

/// An input data port: consumer node plus input index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InPort {
    /// Consumer node
    pub node: NodeId,
    /// Input index on the consumer
    pub index: usize,
}

impl InPort {
    /// Create a new input port reference
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

/// Op-pattern classification used for matching and fusibility decisions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpPattern {
    /// Element-wise computation
    ElemWise,
    /// Broadcasting computation
    Broadcast,
    /// Reduction
    Reduce,
    /// Convolution-like
    Convolution,
    /// Matrix multiplication
    MatMul,
    /// Pooling
    Pool,
    /// Quantization
    Quant,
    /// Dequantization
    Dequant,
    /// Requantization
    Requant,
    /// Not classified, never fused automatically
    Opaque,
    /// Pattern tag outside the built-in set
    Custom(String),
}

impl OpPattern {
    /// Tag string used when pattern descriptors name op patterns
    pub fn as_str(&self) -> &str {
        match self {
            OpPattern::ElemWise => "ElemWise",
            OpPattern::Broadcast => "Broadcast",
            OpPattern::Reduce => "CommReduce",
            OpPattern::Convolution => "Convolution",
            OpPattern::MatMul => "MatMul",
            OpPattern::Pool => "Pool",
            OpPattern::Quant => "quant",
            OpPattern::Dequant => "dequant",
            OpPattern::Requant => "requant",
            OpPattern::Opaque => "Opaque",
            OpPattern::Custom(s) => s.as_str(),
        }
    }

    /// Parse a tag string; unknown tags become [`OpPattern::Custom`]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "ElemWise" => OpPattern::ElemWise,
            "Broadcast" => OpPattern::Broadcast,
            "CommReduce" => OpPattern::Reduce,
            "Convolution" => OpPattern::Convolution,
            "MatMul" => OpPattern::MatMul,
            "Pool" => OpPattern::Pool,
            "quant" => OpPattern::Quant,
            "dequant" => OpPattern::Dequant,
            "requant" => OpPattern::Requant,
            "Opaque" => OpPattern::Opaque,
            other => OpPattern::Custom(other.to_string()),
        }
    }

    /// Quantization-related class
    pub fn is_quant_related(&self) -> bool {
        matches!(
            self,
            OpPattern::Quant | OpPattern::Dequant | OpPattern::Requant
        )
    }
}

impl fmt::Display for OpPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node or graph attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Integer
    Int(i64),
    /// Float
    Float(f32),
    /// Boolean
    Bool(bool),
    /// String
    Str(String),
    /// Integer list
    Ints(Vec<i64>),
}

impl AttrValue {
    /// Integer payload, if any
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Boolean payload, if any
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// An operation instance in the compute graph
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    /// Unique node name
    pub name: String,
    /// Operation type, e.g. `Add` or `Conv2D`
    pub op_type: String,
    /// Op-pattern tag, mutable by classification passes
    pub pattern: OpPattern,
    /// Whether the node is implemented by a dynamic-shape kernel
    pub dynamic_impl: bool,
    /// Node attributes
    pub attrs: AttrMap,
    /// Constant payload for constant nodes
    pub constant: Option<ArrayD<f32>>,
    pub(crate) inputs: Vec<Option<OutPort>>,
    pub(crate) output_count: usize,
    pub(crate) control_in: SmallVec<[NodeId; 2]>,
    pub(crate) control_out: SmallVec<[NodeId; 2]>,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: &str, op_type: &str, pattern: OpPattern) -> Self {
        Self {
            id,
            name: name.to_string(),
            op_type: op_type.to_string(),
            pattern,
            dynamic_impl: false,
            attrs: AttrMap::default(),
            constant: None,
            inputs: Vec::new(),
            output_count: 1,
            control_in: SmallVec::new(),
            control_out: SmallVec::new(),
        }
    }

    /// Node id
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Input ports in order; `None` marks an unconnected port
    pub fn inputs(&self) -> &[Option<OutPort>] {
        &self.inputs
    }

    /// Number of declared output ports
    pub fn output_count(&self) -> usize {
        self.output_count
    }

    /// Control predecessors
    pub fn control_inputs(&self) -> &[NodeId] {
        &self.control_in
    }

    /// Control successors
    pub fn control_outputs(&self) -> &[NodeId] {
        &self.control_out
    }

    /// Get an attribute
    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    /// Set or replace an attribute
    pub fn set_attr(&mut self, key: &str, value: AttrValue) {
        self.attrs.insert(key.to_string(), value);
    }

    /// Remove an attribute
    pub fn remove_attr(&mut self, key: &str) -> Option<AttrValue> {
        self.attrs.remove(key)
    }

    /// Scope id persisted on the node, if any
    pub fn scope_attr(&self) -> Option<u64> {
        self.attr(ATTR_SCOPE_ID)
            .and_then(AttrValue::as_int)
            .and_then(|v| u64::try_from(v).ok())
    }

    /// Whether the node carries a constant payload
    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }
}
