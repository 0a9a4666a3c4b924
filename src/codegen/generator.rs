//! Loop-structured code generation from an integral representation.
//!
//! Emission order: using declarations, initial definitions, static
//! quadrature tables, static basis tables, zeroing of the output, then one
//! block per point count. Each block holds the piecewise computations, then
//! the point loop (or a single scope for one point) with the weight, the
//! varying computations and the nested dof block loops.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use super::ast::{Node, Stmt};
use super::backend::{Backend, Definition, TerminalContext};
use super::partition::{
    DofBlocks, DofRange, PartitionPlan, plan_dofblocks, plan_partitions, ranges_at_level,
};
use crate::analysis::ScalarOp;
use crate::core::error::CompileError;
use crate::core::indexing::strides;
use crate::core::terminal::{FormContext, GeometricQuantity, Terminal};
use crate::representation::{ExprIr, IntegralIr, QuadratureGroup};

/// Names defined so far in the enclosing scopes
type Defined = BTreeSet<String>;

fn push_definitions(out: &mut Vec<Stmt>, defined: &mut Defined, definitions: Vec<Definition>) {
    for definition in definitions {
        if defined.insert(definition.name) {
            out.extend(definition.statements);
        }
    }
}

struct CodeGenerator<'a> {
    ir: &'a IntegralIr,
    ctx: &'a FormContext,
    backend: &'a Backend,
}

/// State of one point group
struct GroupContext<'a> {
    expr_ir: &'a ExprIr,
    plan: PartitionPlan,
    cx: TerminalContext<'a>,
}

impl CodeGenerator<'_> {
    fn generate(&self) -> Result<Vec<Stmt>, CompileError> {
        let access = &*self.backend.access;
        let definitions = &*self.backend.definitions;
        let mut out = definitions.using_declarations();
        let mut defined = Defined::new();

        let cx = TerminalContext {
            form: self.ctx,
            integral_type: self.ir.integral_type,
            num_points: 0,
        };
        let (scale_definitions, scale) = definitions.scale_factor(&cx)?;
        if !scale_definitions.is_empty() {
            out.push(Stmt::comment("Geometry of the integration entity"));
            push_definitions(&mut out, &mut defined, scale_definitions);
        }

        out.push(Stmt::comment("Quadrature rules"));
        for (&num_points, group) in &self.ir.groups {
            out.push(Stmt::static_table(
                access.weights_name(num_points),
                vec![num_points],
                group.rule.weights.clone(),
            ));
            if needs_points(&group.expr_ir) {
                out.push(self.points_table(num_points, group)?);
            }
        }

        let tables: Vec<Stmt> = self
            .ir
            .unique_tables
            .iter()
            .filter(|(_, table)| table.num_dofs() > 0)
            .map(|(name, table)| {
                let sizes = vec![table.num_entities(), table.num_points(), table.num_dofs()];
                let values = table.values.iter().flatten().flatten().copied().collect();
                Stmt::static_table(name.clone(), sizes, values)
            })
            .collect();
        if !tables.is_empty() {
            out.push(Stmt::comment("Basis function tables"));
            out.extend(tables);
        }

        out.push(Stmt::Zero {
            name: access.output_name().to_owned(),
            size: self.ir.output_size(),
        });

        let scoped = self.ir.groups.len() > 1;
        for (&num_points, group) in &self.ir.groups {
            let mut body = vec![Stmt::comment(format!(
                "Quadrature loop body setup ({num_points} points)"
            ))];
            body.extend(self.group(num_points, group, &defined, scale.as_ref())?);
            if scoped {
                out.push(Stmt::Scope(body));
            } else {
                out.extend(body);
            }
        }
        Ok(out)
    }

    fn points_table(&self, num_points: usize, group: &QuadratureGroup) -> Result<Stmt, CompileError> {
        let dim = group.rule.points.first().map_or(0, Vec::len);
        if group.rule.points.iter().any(|p| p.len() != dim) {
            return Err(CompileError::invalid_input(
                "quadrature points of differing dimension",
            ));
        }
        let values = group.rule.points.iter().flatten().copied().collect();
        Ok(Stmt::static_table(
            self.backend.access.points_name(num_points),
            vec![num_points, dim],
            values,
        ))
    }

    fn group(
        &self,
        num_points: usize,
        group: &QuadratureGroup,
        defined: &Defined,
        scale: Option<&Node>,
    ) -> Result<Vec<Stmt>, CompileError> {
        let access = &*self.backend.access;
        let expr_ir = &group.expr_ir;
        let gc = GroupContext {
            expr_ir,
            plan: plan_partitions(expr_ir),
            cx: TerminalContext {
                form: self.ctx,
                integral_type: self.ir.integral_type,
                num_points,
            },
        };
        trace!(
            num_points,
            piecewise = gc.plan.piecewise.len(),
            varying = gc.plan.varying.len(),
            "partitions"
        );

        let mut defined = defined.clone();
        let mut out = self.partition(&gc, false, &mut defined)?;

        let point_index = access.point_index();
        let weight = Node::symbol(access.weights_name(num_points))
            .at(vec![Node::symbol(point_index)]);
        let weight = match scale {
            Some(scale) => Node::Product(Box::new(weight), Box::new(scale.clone())),
            None => weight,
        };
        let mut body = vec![Stmt::const_double(access.weight_name(), weight)];
        body.extend(self.partition(&gc, true, &mut defined)?);
        body.extend(self.dofblock_loops(&gc)?);

        if num_points == 1 {
            let mut scope = vec![Stmt::VariableDecl {
                typename: "int",
                name: point_index.to_owned(),
                value: Some(Node::int(0)),
                is_const: true,
            }];
            scope.extend(body);
            out.push(Stmt::Scope(scope));
        } else {
            out.push(Stmt::comment("Quadrature loop"));
            out.push(Stmt::for_range(
                point_index,
                Node::int(0),
                Node::int(num_points),
                body,
            ));
        }
        Ok(out)
    }

    /// Terminal definitions, scratch array and assignments of one partition
    fn partition(
        &self,
        gc: &GroupContext<'_>,
        varying: bool,
        defined: &mut Defined,
    ) -> Result<Vec<Stmt>, CompileError> {
        let expr_ir = gc.expr_ir;
        let class = &expr_ir.classification;
        let mut out = Vec::new();

        for (v, op) in expr_ir.vertices.iter().enumerate() {
            let Some(mt) = op.as_modified_terminal() else {
                continue;
            };
            if !class.active[v] || class.varying[v] != varying {
                continue;
            }
            let definitions = self.backend.definitions.modified_terminal(
                &gc.cx,
                mt,
                expr_ir.table_ranges[v].as_ref(),
                varying,
            )?;
            push_definitions(&mut out, defined, definitions);
        }

        let vertices = if varying { &gc.plan.varying } else { &gc.plan.piecewise };
        if vertices.is_empty() {
            return Ok(out);
        }
        let name = self.backend.access.scratch_name(varying, gc.cx.num_points);
        out.push(Stmt::comment(if varying {
            "Varying computations"
        } else {
            "Piecewise constant computations"
        }));
        out.push(Stmt::double_array(name.clone(), vec![vertices.len()]));
        for (slot, &v) in vertices.iter().enumerate() {
            let value = self.expression(gc, &expr_ir.vertices[v])?;
            out.push(Stmt::Assign(
                Node::symbol(name.clone()).at(vec![Node::int(slot)]),
                value,
            ));
        }
        Ok(out)
    }

    /// Read expression of a vertex value
    fn access(&self, gc: &GroupContext<'_>, v: usize) -> Result<Node, CompileError> {
        match &gc.expr_ir.vertices[v] {
            ScalarOp::Literal(value) => Ok(Node::LiteralFloat(value.0)),
            ScalarOp::ModifiedTerminal(mt) => self.backend.access.modified_terminal(
                &gc.cx,
                mt,
                gc.expr_ir.table_ranges[v].as_ref(),
            ),
            _ => {
                let slot = gc.plan.slot(v).ok_or_else(|| {
                    CompileError::invalid_input(format!("vertex {v} is used but not scheduled"))
                })?;
                let name = self.backend.access.scratch_name(slot.varying, gc.cx.num_points);
                Ok(Node::symbol(name).at(vec![Node::int(slot.index)]))
            }
        }
    }

    fn expression(&self, gc: &GroupContext<'_>, op: &ScalarOp) -> Result<Node, CompileError> {
        let arg = |v: usize| self.access(gc, v).map(Box::new);
        Ok(match op {
            ScalarOp::Literal(_) | ScalarOp::ModifiedTerminal(_) => {
                return Err(CompileError::invalid_input("terminal scheduled as a computation"));
            }
            ScalarOp::Sum(a, b) => Node::Sum(arg(*a)?, arg(*b)?),
            ScalarOp::Product(a, b) => Node::Product(arg(*a)?, arg(*b)?),
            ScalarOp::Division(a, b) => Node::Division(arg(*a)?, arg(*b)?),
            ScalarOp::Power(a, b) => Node::Power(arg(*a)?, arg(*b)?),
            ScalarOp::MathFunction(f, a) => Node::MathFunction(*f, arg(*a)?),
            ScalarOp::Comparison(op, a, b) => Node::Comparison(*op, arg(*a)?, arg(*b)?),
            ScalarOp::Not(a) => Node::Not(arg(*a)?),
            ScalarOp::And(a, b) => Node::And(arg(*a)?, arg(*b)?),
            ScalarOp::Or(a, b) => Node::Or(arg(*a)?, arg(*b)?),
            ScalarOp::Conditional(c, t, f) => Node::Conditional(arg(*c)?, arg(*t)?, arg(*f)?),
        })
    }

    fn dofblock_loops(&self, gc: &GroupContext<'_>) -> Result<Vec<Stmt>, CompileError> {
        let blocks = plan_dofblocks(self.ctx, gc.expr_ir);
        debug!(
            num_points = gc.cx.num_points,
            blocks = blocks.len(),
            "dof blocks"
        );
        self.dofblock_level(gc, &blocks, &mut Vec::new())
    }

    fn dofblock_level(
        &self,
        gc: &GroupContext<'_>,
        blocks: &DofBlocks,
        prefix: &mut Vec<DofRange>,
    ) -> Result<Vec<Stmt>, CompileError> {
        if prefix.len() == self.ir.rank {
            return match blocks.get(prefix.as_slice()) {
                Some(terms) => terms
                    .iter()
                    .map(|(tuple, factor)| self.accumulate(gc, prefix, tuple, *factor))
                    .collect(),
                None => Ok(Vec::new()),
            };
        }
        let mut out = Vec::new();
        for range in ranges_at_level(blocks, prefix) {
            let level = prefix.len();
            prefix.push(range);
            let body = self.dofblock_level(gc, blocks, prefix)?;
            prefix.pop();
            out.push(Stmt::for_range(
                self.backend.access.dof_index(level),
                Node::int(range.begin),
                Node::int(range.end),
                body,
            ));
        }
        Ok(out)
    }

    /// `A[flat] += weight * factor * prod(tables)`
    fn accumulate(
        &self,
        gc: &GroupContext<'_>,
        block: &[DofRange],
        tuple: &[usize],
        factor: usize,
    ) -> Result<Stmt, CompileError> {
        let access = &*self.backend.access;
        let af = &gc.expr_ir.argument_factorization;

        let flat = strides(&self.ir.argument_dims)
            .into_iter()
            .enumerate()
            .map(|(level, stride)| {
                let index = Node::symbol(access.dof_index(level));
                if stride == 1 {
                    index
                } else {
                    Node::Product(Box::new(index), Box::new(Node::int(stride)))
                }
            })
            .reduce(|acc, term| Node::Sum(Box::new(acc), Box::new(term)))
            .unwrap_or_else(|| Node::int(0));

        let mut terms = vec![Node::symbol(access.weight_name())];
        let factor = self.access(gc, factor)?;
        if !factor.is_literal_one() {
            terms.push(factor);
        }
        for (level, (&ma, range)) in tuple.iter().zip(block).enumerate() {
            let argument = &af.modified_arguments[ma].terminal;
            let table_range = &gc.expr_ir.modified_argument_table_ranges[ma];
            let point = if argument.averaged.is_some() {
                Node::int(0)
            } else {
                Node::symbol(access.point_index())
            };
            let column = Node::symbol(access.dof_index(level)).minus_offset(range.begin);
            terms.push(access.table(&gc.cx, argument, table_range, point, column));
        }
        let value = Node::product(terms).unwrap_or(Node::LiteralFloat(0.0));
        Ok(Stmt::AssignAdd(access.output(flat), value))
    }
}

/// Whether any active vertex reads the spatial coordinate at the points
fn needs_points(expr_ir: &ExprIr) -> bool {
    expr_ir.vertices.iter().enumerate().any(|(v, op)| {
        expr_ir.classification.active[v]
            && op.as_modified_terminal().is_some_and(|mt| {
                mt.terminal == Terminal::Geometry(GeometricQuantity::SpatialCoordinate)
                    && mt.derivatives.is_empty()
                    && mt.averaged.is_none()
            })
    })
}

/// Generate the statement tree of an integral.
///
/// # Errors
/// Errors reported by the backend resolvers (unsupported geometry,
/// quantities used outside their integral type) and malformed quadrature
/// points.
pub fn generate_integral(
    ir: &IntegralIr,
    ctx: &FormContext,
    backend: &Backend,
) -> Result<Vec<Stmt>, CompileError> {
    CodeGenerator { ir, ctx, backend }.generate()
}
