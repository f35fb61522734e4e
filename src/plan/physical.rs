//! Physical plan — the operator tree describing *how* to compute.
//!
//! Lowering picks a concrete strategy per logical operator. Any logical
//! operator without a physical strategy is a planner error; there is no
//! silent fallback.

use std::fmt;

use super::logical::{value_to_expr, LogicalNode, LogicalOp, PlanProjection, PlanSortKey};
use super::PlannerConfig;
use crate::cypher::ast::{BinaryOp, Expr};
use crate::model::Value;
use crate::{Error, Result};

/// A physical operator tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalNode {
    pub op: PhysicalOp,
    pub cost: f64,
    pub rows: i64,
    /// Estimated fraction of input rows surviving this operator.
    pub selectivity: f64,
}

/// The physical operator set.
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalOp {
    AllNodesScan { alias: String },
    LabelIndexScan { alias: String, label: String },
    PropertyIndexScan { alias: String, label: String, property: String, value: Value },
    AllRelsScan { alias: String },
    TypeIndexScan { alias: String, rel_type: String },

    HashJoin { left: Box<PhysicalNode>, right: Box<PhysicalNode> },
    NestedLoopJoin { left: Box<PhysicalNode>, right: Box<PhysicalNode> },
    IndexNestedLoop { left: Box<PhysicalNode>, right: Box<PhysicalNode> },

    Filter { input: Box<PhysicalNode>, predicate: Expr },
    Projection { input: Box<PhysicalNode>, items: Vec<PlanProjection> },
    Sort { input: Box<PhysicalNode>, keys: Vec<PlanSortKey> },
    Limit { input: Box<PhysicalNode>, count: i64 },
    Skip { input: Box<PhysicalNode>, count: i64 },
    Distinct { input: Box<PhysicalNode> },
    Aggregation {
        input: Box<PhysicalNode>,
        groups: Vec<PlanProjection>,
        aggregates: Vec<PlanProjection>,
    },
    Unwind { input: Option<Box<PhysicalNode>>, expr: Expr, alias: String },
}

impl PhysicalNode {
    fn new(op: PhysicalOp, cost: f64, rows: i64) -> Self {
        Self {
            op,
            cost,
            rows,
            selectivity: 1.0,
        }
    }

    pub fn children(&self) -> Vec<&PhysicalNode> {
        use PhysicalOp::*;
        match &self.op {
            AllNodesScan { .. } | LabelIndexScan { .. } | PropertyIndexScan { .. }
            | AllRelsScan { .. } | TypeIndexScan { .. } => Vec::new(),
            HashJoin { left, right }
            | NestedLoopJoin { left, right }
            | IndexNestedLoop { left, right } => vec![left, right],
            Filter { input, .. }
            | Projection { input, .. }
            | Sort { input, .. }
            | Limit { input, .. }
            | Skip { input, .. }
            | Distinct { input }
            | Aggregation { input, .. } => vec![input],
            Unwind { input, .. } => input.iter().map(|b| b.as_ref()).collect(),
        }
    }

    /// Aliases bound at this node's output, in binding order.
    pub fn aliases(&self) -> Vec<String> {
        use PhysicalOp::*;
        match &self.op {
            AllNodesScan { alias }
            | LabelIndexScan { alias, .. }
            | PropertyIndexScan { alias, .. }
            | AllRelsScan { alias }
            | TypeIndexScan { alias, .. } => vec![alias.clone()],
            HashJoin { left, right }
            | NestedLoopJoin { left, right }
            | IndexNestedLoop { left, right } => {
                let mut out = left.aliases();
                for a in right.aliases() {
                    if !out.contains(&a) {
                        out.push(a);
                    }
                }
                out
            }
            Filter { input, .. }
            | Sort { input, .. }
            | Limit { input, .. }
            | Skip { input, .. }
            | Distinct { input } => input.aliases(),
            Projection { items, .. } => items
                .iter()
                .enumerate()
                .map(|(i, item)| item.label.clone().unwrap_or_else(|| format!("col{i}")))
                .collect(),
            Aggregation { groups, aggregates, .. } => groups
                .iter()
                .chain(aggregates.iter())
                .enumerate()
                .map(|(i, item)| item.label.clone().unwrap_or_else(|| format!("col{i}")))
                .collect(),
            Unwind { input, alias, .. } => {
                let mut out = input.as_ref().map(|i| i.aliases()).unwrap_or_default();
                if !out.contains(alias) {
                    out.push(alias.clone());
                }
                out
            }
        }
    }
}

// ============================================================================
// Lowering
// ============================================================================

/// Lower a logical plan to a physical plan under the given configuration.
pub fn lower(node: &LogicalNode, config: &PlannerConfig) -> Result<PhysicalNode> {
    use LogicalOp as L;

    let lowered = match &node.op {
        L::NodeScan { alias, .. } => PhysicalNode::new(
            PhysicalOp::AllNodesScan { alias: alias.clone() },
            node.cost,
            node.rows,
        ),

        L::LabelScan { alias, label } => {
            if config.enable_indexes && !label.is_empty() {
                PhysicalNode::new(
                    PhysicalOp::LabelIndexScan {
                        alias: alias.clone(),
                        label: label.clone(),
                    },
                    node.cost * config.index_cost_factor,
                    node.rows,
                )
            } else {
                // Downgrade keeps the label predicate alive as a filter.
                let scan = PhysicalNode::new(
                    PhysicalOp::AllNodesScan { alias: alias.clone() },
                    node.cost,
                    node.rows,
                );
                let mut filter = PhysicalNode::new(
                    PhysicalOp::Filter {
                        input: Box::new(scan),
                        predicate: Expr::HasLabel {
                            expr: Box::new(Expr::Variable(alias.clone())),
                            label: label.clone(),
                        },
                    },
                    node.cost + 1.0,
                    node.rows,
                );
                filter.selectivity = 0.1;
                filter
            }
        }

        L::IndexScan { alias, label, property, value } => PhysicalNode::new(
            PhysicalOp::PropertyIndexScan {
                alias: alias.clone(),
                label: label.clone(),
                property: property.clone(),
                value: value.clone(),
            },
            node.cost * config.index_cost_factor,
            node.rows,
        ),

        L::RelScan { alias } => PhysicalNode::new(
            PhysicalOp::AllRelsScan { alias: alias.clone() },
            node.cost,
            node.rows,
        ),

        L::TypeScan { alias, rel_type } => PhysicalNode::new(
            PhysicalOp::TypeIndexScan {
                alias: alias.clone(),
                rel_type: rel_type.clone(),
            },
            node.cost * config.index_cost_factor,
            node.rows,
        ),

        L::Filter { input, predicate } => {
            let child = lower(input, config)?;
            let mut n = PhysicalNode::new(
                PhysicalOp::Filter {
                    input: Box::new(child),
                    predicate: predicate.clone(),
                },
                node.cost,
                node.rows,
            );
            n.selectivity = 0.1;
            n
        }

        L::PropertyFilter { input, alias, property, value } => {
            let child = lower(input, config)?;
            let predicate = Expr::Binary {
                left: Box::new(Expr::Property {
                    expr: Box::new(Expr::Variable(alias.clone())),
                    key: property.clone(),
                }),
                op: BinaryOp::Eq,
                right: Box::new(value_to_expr(value)),
            };
            let mut n = PhysicalNode::new(
                PhysicalOp::Filter {
                    input: Box::new(child),
                    predicate,
                },
                node.cost,
                node.rows,
            );
            n.selectivity = 0.1;
            n
        }

        L::LabelFilter { input, alias, label } => {
            let child = lower(input, config)?;
            let predicate = Expr::HasLabel {
                expr: Box::new(Expr::Variable(alias.clone())),
                label: label.clone(),
            };
            let mut n = PhysicalNode::new(
                PhysicalOp::Filter {
                    input: Box::new(child),
                    predicate,
                },
                node.cost,
                node.rows,
            );
            n.selectivity = 0.1;
            n
        }

        L::HashJoin { left, right } => PhysicalNode::new(
            PhysicalOp::HashJoin {
                left: Box::new(lower(left, config)?),
                right: Box::new(lower(right, config)?),
            },
            node.cost,
            node.rows,
        ),

        L::NestedLoopJoin { left, right } => {
            let (l, r) = (lower(left, config)?, lower(right, config)?);
            let op = if config.enable_indexes {
                PhysicalOp::IndexNestedLoop {
                    left: Box::new(l),
                    right: Box::new(r),
                }
            } else {
                PhysicalOp::NestedLoopJoin {
                    left: Box::new(l),
                    right: Box::new(r),
                }
            };
            PhysicalNode::new(op, node.cost, node.rows)
        }

        L::CartesianProduct { left, right } => PhysicalNode::new(
            PhysicalOp::NestedLoopJoin {
                left: Box::new(lower(left, config)?),
                right: Box::new(lower(right, config)?),
            },
            node.cost,
            node.rows,
        ),

        L::Projection { input, items } => PhysicalNode::new(
            PhysicalOp::Projection {
                input: Box::new(lower(input, config)?),
                items: items.clone(),
            },
            node.cost,
            node.rows,
        ),

        L::Distinct { input } => PhysicalNode::new(
            PhysicalOp::Distinct {
                input: Box::new(lower(input, config)?),
            },
            node.cost,
            node.rows,
        ),

        L::Aggregation { input, groups, aggregates } => PhysicalNode::new(
            PhysicalOp::Aggregation {
                input: Box::new(lower(input, config)?),
                groups: groups.clone(),
                aggregates: aggregates.clone(),
            },
            node.cost,
            node.rows,
        ),

        L::Sort { input, keys } => PhysicalNode::new(
            PhysicalOp::Sort {
                input: Box::new(lower(input, config)?),
                keys: keys.clone(),
            },
            node.cost,
            node.rows,
        ),

        L::Limit { input, count } => PhysicalNode::new(
            PhysicalOp::Limit {
                input: Box::new(lower(input, config)?),
                count: *count,
            },
            node.cost,
            node.rows,
        ),

        L::Skip { input, count } => PhysicalNode::new(
            PhysicalOp::Skip {
                input: Box::new(lower(input, config)?),
                count: *count,
            },
            node.cost,
            node.rows,
        ),

        L::Unwind { input, expr, alias } => {
            let child = match input {
                Some(i) => Some(Box::new(lower(i, config)?)),
                None => None,
            };
            PhysicalNode::new(
                PhysicalOp::Unwind {
                    input: child,
                    expr: expr.clone(),
                    alias: alias.clone(),
                },
                node.cost,
                node.rows,
            )
        }

        other => {
            return Err(Error::Planner(format!(
                "no physical strategy for logical operator {}",
                logical_op_name(other)
            )));
        }
    };

    Ok(lowered)
}

fn logical_op_name(op: &LogicalOp) -> &'static str {
    use LogicalOp::*;
    match op {
        NodeScan { .. } => "NodeScan",
        LabelScan { .. } => "LabelScan",
        IndexScan { .. } => "IndexScan",
        RelScan { .. } => "RelScan",
        TypeScan { .. } => "TypeScan",
        Expand { .. } => "Expand",
        VarLengthExpand { .. } => "VarLengthExpand",
        OptionalExpand { .. } => "OptionalExpand",
        Filter { .. } => "Filter",
        PropertyFilter { .. } => "PropertyFilter",
        LabelFilter { .. } => "LabelFilter",
        HashJoin { .. } => "HashJoin",
        NestedLoopJoin { .. } => "NestedLoopJoin",
        CartesianProduct { .. } => "CartesianProduct",
        Projection { .. } => "Projection",
        Distinct { .. } => "Distinct",
        Aggregation { .. } => "Aggregation",
        Sort { .. } => "Sort",
        Limit { .. } => "Limit",
        Skip { .. } => "Skip",
        Unwind { .. } => "Unwind",
        Create { .. } => "Create",
        Merge { .. } => "Merge",
        Set { .. } => "Set",
        Delete { .. } => "Delete",
        DetachDelete { .. } => "DetachDelete",
    }
}

// ============================================================================
// Rendering
// ============================================================================

impl PhysicalNode {
    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        use PhysicalOp::*;
        for _ in 0..indent {
            write!(f, "  ")?;
        }
        let head = match &self.op {
            AllNodesScan { alias } => format!("AllNodesScan({alias})"),
            LabelIndexScan { alias, label } => format!("LabelIndexScan({alias}:{label})"),
            PropertyIndexScan { alias, label, property, value } => {
                format!("PropertyIndexScan({alias}:{label}.{property} = {value})")
            }
            AllRelsScan { alias } => format!("AllRelsScan({alias})"),
            TypeIndexScan { alias, rel_type } => format!("TypeIndexScan({alias}:{rel_type})"),
            HashJoin { .. } => "HashJoin".to_string(),
            NestedLoopJoin { .. } => "NestedLoopJoin".to_string(),
            IndexNestedLoop { .. } => "IndexNestedLoop".to_string(),
            Filter { predicate, .. } => format!("Filter({predicate})"),
            Projection { items, .. } => {
                let cols: Vec<String> = items
                    .iter()
                    .enumerate()
                    .map(|(i, it)| it.label.clone().unwrap_or_else(|| format!("col{i}")))
                    .collect();
                format!("Projection({})", cols.join(", "))
            }
            Sort { keys, .. } => format!("Sort({} keys)", keys.len()),
            Limit { count, .. } => format!("Limit({count})"),
            Skip { count, .. } => format!("Skip({count})"),
            Distinct { .. } => "Distinct".to_string(),
            Aggregation { groups, aggregates, .. } => {
                format!("Aggregation(groups={}, aggregates={})", groups.len(), aggregates.len())
            }
            Unwind { alias, .. } => format!("Unwind({alias})"),
        };
        writeln!(
            f,
            "{head} [cost={:.2}, rows={}, selectivity={:.2}]",
            self.cost, self.rows, self.selectivity
        )?;
        for child in self.children() {
            child.fmt_indent(f, indent + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PhysicalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    fn config() -> PlannerConfig {
        PlannerConfig::default()
    }

    #[test]
    fn test_label_scan_lowers_to_label_index_scan() {
        let mut scan = LogicalNode::new(LogicalOp::LabelScan {
            alias: "n".into(),
            label: "Person".into(),
        });
        scan.estimate(true);
        let phys = lower(&scan, &config()).unwrap();
        assert!(matches!(phys.op, PhysicalOp::LabelIndexScan { .. }));
        // Index-driven scan pays base cost times the index cost factor.
        assert!((phys.cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_label_scan_without_indexes_keeps_label_filter() {
        let mut scan = LogicalNode::new(LogicalOp::LabelScan {
            alias: "n".into(),
            label: "Person".into(),
        });
        scan.estimate(true);
        let cfg = PlannerConfig {
            enable_indexes: false,
            ..PlannerConfig::default()
        };
        let phys = lower(&scan, &cfg).unwrap();
        let PhysicalOp::Filter { input, predicate } = &phys.op else {
            panic!("expected Filter over AllNodesScan");
        };
        assert!(matches!(input.op, PhysicalOp::AllNodesScan { .. }));
        assert!(matches!(predicate, Expr::HasLabel { .. }));
    }

    #[test]
    fn test_index_scan_carries_value() {
        let mut scan = LogicalNode::new(LogicalOp::IndexScan {
            alias: "n".into(),
            label: "Person".into(),
            property: "name".into(),
            value: Value::Str("A".into()),
        });
        scan.estimate(true);
        let phys = lower(&scan, &config()).unwrap();
        let PhysicalOp::PropertyIndexScan { value, .. } = &phys.op else {
            panic!("expected PropertyIndexScan");
        };
        assert_eq!(value, &Value::Str("A".into()));
    }

    #[test]
    fn test_unhandled_operator_is_planner_error() {
        let mut expand = LogicalNode::new(LogicalOp::Expand {
            input: Box::new(LogicalNode::new(LogicalOp::NodeScan {
                alias: "a".into(),
                label: None,
            })),
            from_alias: "a".into(),
            rel_alias: None,
            to_alias: "b".into(),
            types: vec![],
            direction: crate::cypher::ast::RelDirection::Outgoing,
        });
        expand.estimate(true);
        let err = lower(&expand, &config()).unwrap_err();
        assert_eq!(err.code(), "PLANNER");
        assert!(err.to_string().contains("Expand"));
    }

    #[test]
    fn test_lowering_preserves_root_aliases() {
        let mut join = LogicalNode::new(LogicalOp::HashJoin {
            left: Box::new(LogicalNode::new(LogicalOp::LabelScan {
                alias: "a".into(),
                label: "L".into(),
            })),
            right: Box::new(LogicalNode::new(LogicalOp::LabelScan {
                alias: "b".into(),
                label: "R".into(),
            })),
        });
        join.estimate(true);
        let phys = lower(&join, &config()).unwrap();
        assert_eq!(phys.aliases(), join.aliases());
    }
}
