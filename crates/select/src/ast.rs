//! Expression forest for parsed selections.
//!
//! Nodes live in a single [`NodeArena`] owned by the collection and refer to
//! each other by [`NodeId`]. Children are index lists, so the forest can be
//! dropped as a unit and nodes can be rewritten in place (group resolution
//! turns a `GroupReference` into a `ConstantGroup`).

use std::fmt;

use rst_core::positions::PositionType;

use crate::index::AtomIndexSet;
use crate::methods::MethodId;
use crate::poscalc::DescriptorId;

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// String matching pattern (supports * and ? globs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringPattern {
    Exact(String),
    Glob(String),
}

impl StringPattern {
    pub fn new(text: &str) -> Self {
        if text.contains('*') || text.contains('?') {
            StringPattern::Glob(text.to_string())
        } else {
            StringPattern::Exact(text.to_string())
        }
    }

    pub fn matches(&self, s: &str) -> bool {
        match self {
            StringPattern::Exact(pat) => s == pat,
            StringPattern::Glob(pat) => glob_match(pat, s),
        }
    }
}

impl fmt::Display for StringPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringPattern::Exact(s) | StringPattern::Glob(s) => f.write_str(s),
        }
    }
}

/// Simple glob matcher supporting * and ?.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let (mut star_pi, mut star_ti) = (usize::MAX, 0);

    while ti < txt.len() {
        if pi < pat.len() && (pat[pi] == '?' || pat[pi] == txt[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < pat.len() && pat[pi] == '*' {
            star_pi = pi;
            star_ti = ti;
            pi += 1;
        } else if star_pi != usize::MAX {
            pi = star_pi + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }
    while pi < pat.len() && pat[pi] == '*' {
        pi += 1;
    }
    pi == pat.len()
}

/// Inclusive integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    Single(i64),
    Range(i64, i64),
}

impl RangeSpec {
    pub fn contains(&self, value: i64) -> bool {
        match self {
            RangeSpec::Single(v) => *v == value,
            RangeSpec::Range(lo, hi) => value >= *lo && value <= *hi,
        }
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeSpec::Single(v) => write!(f, "{}", v),
            RangeSpec::Range(lo, hi) => write!(f, "{} to {}", lo, hi),
        }
    }
}

/// Values a keyword method is matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Patterns(Vec<StringPattern>),
    Ranges(Vec<RangeSpec>),
}

impl Matcher {
    pub fn matches_str(&self, s: &str) -> bool {
        match self {
            Matcher::Patterns(pats) => pats.iter().any(|p| p.matches(s)),
            Matcher::Ranges(_) => false,
        }
    }

    pub fn matches_int(&self, value: i64) -> bool {
        match self {
            Matcher::Ranges(ranges) => ranges.iter().any(|r| r.contains(value)),
            Matcher::Patterns(_) => false,
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = match self {
            Matcher::Patterns(p) => p.iter().map(|p| format!("\"{}\"", p)).collect(),
            Matcher::Ranges(r) => r.iter().map(|r| r.to_string()).collect(),
        };
        f.write_str(&parts.join(" "))
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn compare(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Gt => lhs > rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Eq => (lhs - rhs).abs() < 1e-9,
            CmpOp::Ne => (lhs - rhs).abs() >= 1e-9,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Gt => ">",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
    Xor,
    Not,
}

impl BoolOp {
    pub fn name(&self) -> &'static str {
        match self {
            BoolOp::And => "AND",
            BoolOp::Or => "OR",
            BoolOp::Xor => "XOR",
            BoolOp::Not => "NOT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Neg => "neg",
        }
    }

    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Neg => -a,
        }
    }
}

/// Whether a root is a user selection or a bound variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Selection,
    Variable,
}

/// Node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// External group not yet resolved, by name or 0-based position.
    GroupReference { name: Option<String>, id: Option<usize> },
    /// Resolved group.
    ConstantGroup { name: String, atoms: AtomIndexSet },
    /// Numeric constant.
    Literal(f64),
    Boolean(BoolOp),
    Compare(CmpOp),
    Arithmetic(ArithOp),
    /// Method call; expression parameters are the node's children in
    /// signature order, keyword choices are kept in `choices`.
    MethodCall {
        method: MethodId,
        choices: Vec<&'static str>,
        matcher: Option<Matcher>,
    },
    /// Reduction of the child group to positions.
    Positions(PositionType),
    /// Reference to a bound variable (index into the collection's roots).
    VariableRef { name: String, root: usize },
    Root(RootKind),
}

/// Type of the value a node produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Group,
    /// One integer per atom
    Int,
    /// One real per atom
    Real,
    /// One string per atom; only usable through a matcher
    Str,
    /// Single numeric constant
    Scalar,
    Positions,
}

impl ValueType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Int | ValueType::Real | ValueType::Scalar)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Group => "group",
            ValueType::Int => "integer",
            ValueType::Real => "real",
            ValueType::Str => "string",
            ValueType::Scalar => "number",
            ValueType::Positions => "positions",
        };
        f.write_str(s)
    }
}

/// Last evaluated value of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Group(AtomIndexSet),
    Int(Vec<i64>),
    Real(Vec<f64>),
    Scalar(f64),
    Positions(DescriptorId),
}

impl Value {
    pub fn as_group(&self) -> Option<&AtomIndexSet> {
        match self {
            Value::Group(g) => Some(g),
            _ => None,
        }
    }

    /// Numeric value for one atom.
    pub fn numeric_at(&self, atom: usize) -> Option<f64> {
        match self {
            Value::Int(v) => v.get(atom).map(|&i| i as f64),
            Value::Real(v) => v.get(atom).copied(),
            Value::Scalar(s) => Some(*s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Group(g) => {
                write!(f, "group ({} atoms)", g.len())?;
                for a in g.iter().take(16) {
                    write!(f, " {}", a)?;
                }
                if g.len() > 16 {
                    f.write_str(" ...")?;
                }
                Ok(())
            }
            Value::Int(v) => write!(f, "int[{}]", v.len()),
            Value::Real(v) => write!(f, "real[{}]", v.len()),
            Value::Scalar(s) => write!(f, "{}", s),
            Value::Positions(d) => write!(f, "positions {}", d),
        }
    }
}

/// One expression node.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
    /// Root (index into the collection's roots) whose statement created the node
    pub owner: usize,
    /// Byte span in the owning statement's text
    pub span: Option<(usize, usize)>,
    /// Value may change from frame to frame
    pub dynamic: bool,
    /// Needs topology information regardless of position settings
    pub requires_topology: bool,
    pub value: Option<Value>,
}

/// Arena holding every node of a collection.
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a node, deriving its dynamic/topology flags from its children.
    pub fn push(
        &mut self,
        kind: NodeKind,
        children: Vec<NodeId>,
        owner: usize,
        span: Option<(usize, usize)>,
        own_dynamic: bool,
        own_topology: bool,
    ) -> NodeId {
        let dynamic = own_dynamic || children.iter().any(|&c| self.nodes[c.0].dynamic);
        let requires_topology =
            own_topology || children.iter().any(|&c| self.nodes[c.0].requires_topology);
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            children,
            owner,
            span,
            dynamic,
            requires_topology,
            value: None,
        });
        id
    }

    /// Drop every node from `len` onwards.
    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Forget every cached value.
    pub fn clear_values(&mut self) {
        for node in &mut self.nodes {
            node.value = None;
        }
    }
}

impl std::ops::Index<NodeId> for NodeArena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}

impl std::ops::IndexMut<NodeId> for NodeArena {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_exact() {
        assert!(glob_match("CA", "CA"));
        assert!(!glob_match("CA", "CB"));
    }

    #[test]
    fn test_glob_star() {
        assert!(glob_match("C*", "CA"));
        assert!(glob_match("C*", "C"));
        assert!(!glob_match("C*", "NA"));
        assert!(glob_match("*1", "HW1"));
    }

    #[test]
    fn test_glob_question() {
        assert!(glob_match("C?", "CA"));
        assert!(!glob_match("C?", "C"));
        assert!(!glob_match("C?", "CAB"));
    }

    #[test]
    fn test_matcher() {
        let m = Matcher::Ranges(vec![RangeSpec::Single(5), RangeSpec::Range(1, 3)]);
        assert!(m.matches_int(2));
        assert!(m.matches_int(5));
        assert!(!m.matches_int(4));
        assert!(!m.matches_str("2"));
        let m = Matcher::Patterns(vec![StringPattern::new("H*"), StringPattern::new("CA")]);
        assert!(m.matches_str("HW1"));
        assert!(m.matches_str("CA"));
        assert!(!m.matches_str("CB"));
        assert_eq!(m.to_string(), "\"H*\" \"CA\"");
    }

    #[test]
    fn test_flags_propagate() {
        let mut arena = NodeArena::new();
        let a = arena.push(NodeKind::Literal(1.0), vec![], 0, None, false, false);
        let b = arena.push(NodeKind::Literal(2.0), vec![], 0, None, true, true);
        let c = arena.push(NodeKind::Arithmetic(ArithOp::Add), vec![a, b], 0, None, false, false);
        assert!(!arena[a].dynamic);
        assert!(arena[c].dynamic);
        assert!(arena[c].requires_topology);
        arena.truncate(2);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_cmp_epsilon() {
        assert!(CmpOp::Eq.compare(1.0, 1.0 + 1e-12));
        assert!(CmpOp::Ne.compare(1.0, 1.1));
        assert!(CmpOp::Le.compare(1.0, 1.0));
    }
}
