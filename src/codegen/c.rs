//! Default C backend.
//!
//! Emits one `tabulate_tensor` style function. Geometry is computed with
//! `ufc_geometry.h` style helpers (`compute_jacobian_triangle_2d` and
//! friends), coefficients are evaluated from their dofs and basis tables.
//! Only affine cells carry geometry.

use super::ast::{Node, Stmt};
use super::backend::{AccessResolver, Definition, DefinitionsResolver, Language, TerminalContext};
use super::precedence::{POSTFIX, precedence};
use crate::core::error::CompileError;
use crate::core::expr::{MathFunction, Restriction};
use crate::core::indexing::product;
use crate::core::modified::ModifiedTerminal;
use crate::core::terminal::{FormArgumentId, FormArgumentKind, GeometricQuantity, Terminal};
use crate::representation::tables::TableRange;
use crate::representation::{IntegralType, dof_offset};

const INDENT: &str = "    ";

/// C spelling of a float literal; always carries a decimal point
pub fn format_float(value: f64, precision: Option<usize>) -> String {
    if value.is_nan() {
        return "NAN".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "INFINITY" } else { "-INFINITY" }.to_owned();
    }
    let mut s = match precision {
        None => format!("{value:?}"),
        Some(p) => {
            let s = format!("{value:.p$}");
            if s.contains('.') {
                let trimmed = s.trim_end_matches('0');
                if trimmed.ends_with('.') {
                    format!("{trimmed}0")
                } else {
                    trimmed.to_owned()
                }
            } else {
                s
            }
        }
    };
    if !s.contains('.') {
        match s.find('e') {
            Some(pos) => s.insert_str(pos, ".0"),
            None => s.push_str(".0"),
        }
    }
    s
}

const fn function_name(function: MathFunction) -> &'static str {
    match function {
        MathFunction::Sqrt => "sqrt",
        MathFunction::Exp => "exp",
        MathFunction::Ln => "log",
        MathFunction::Sin => "sin",
        MathFunction::Cos => "cos",
        MathFunction::Tan => "tan",
        MathFunction::Abs => "fabs",
        MathFunction::Atan => "atan",
    }
}

// =============================================================================
// LANGUAGE
// =============================================================================

/// C99 formatting
#[derive(Debug, Clone, Copy, Default)]
pub struct CLanguage {
    precision: Option<usize>,
}

impl CLanguage {
    pub fn new(precision: Option<usize>) -> Self {
        Self { precision }
    }

    fn operand(&self, node: &Node, parent: u8) -> String {
        if precedence(node) < parent {
            format!("({})", self.format_node(node))
        } else {
            self.format_node(node)
        }
    }

    fn binary(&self, a: &Node, op: &str, b: &Node, p: u8) -> String {
        format!("{} {op} {}", self.operand(a, p), self.operand(b, p + 1))
    }

    fn join(&self, nodes: &[Node]) -> String {
        nodes
            .iter()
            .map(|n| self.format_node(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn initializer(&self, values: &[f64], sizes: &[usize], depth: usize) -> String {
        match sizes {
            [] | [_] => {
                let items: Vec<String> = values
                    .iter()
                    .map(|v| format_float(*v, self.precision))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            [first, rest @ ..] => {
                let chunk = product(rest).max(1);
                let pad = INDENT.repeat(depth + 1);
                let rows: Vec<String> = values
                    .chunks(chunk)
                    .take(*first)
                    .map(|row| self.initializer(row, rest, depth + 1))
                    .collect();
                format!(
                    "{{\n{pad}{}\n{}}}",
                    rows.join(&format!(",\n{pad}")),
                    INDENT.repeat(depth)
                )
            }
        }
    }

    fn write_stmt(&self, out: &mut String, stmt: &Stmt, depth: usize) {
        let pad = INDENT.repeat(depth);
        match stmt {
            Stmt::Comment(text) => out.push_str(&format!("{pad}// {text}\n")),
            Stmt::Using(header) => out.push_str(&format!("{pad}#include <{header}>\n")),
            Stmt::ArrayDecl {
                typename,
                name,
                sizes,
                values,
                is_static,
            } => {
                let dims: String = sizes.iter().map(|s| format!("[{s}]")).collect();
                let qualifier = if *is_static { "static const " } else { "" };
                match values {
                    None => out.push_str(&format!("{pad}{qualifier}{typename} {name}{dims};\n")),
                    Some(values) => out.push_str(&format!(
                        "{pad}{qualifier}{typename} {name}{dims} = {};\n",
                        self.initializer(values, sizes, depth)
                    )),
                }
            }
            Stmt::VariableDecl {
                typename,
                name,
                value,
                is_const,
            } => {
                let qualifier = if *is_const { "const " } else { "" };
                match value {
                    None => out.push_str(&format!("{pad}{qualifier}{typename} {name};\n")),
                    Some(value) => out.push_str(&format!(
                        "{pad}{qualifier}{typename} {name} = {};\n",
                        self.format_node(value)
                    )),
                }
            }
            Stmt::Assign(target, value) => out.push_str(&format!(
                "{pad}{} = {};\n",
                self.format_node(target),
                self.format_node(value)
            )),
            Stmt::AssignAdd(target, value) => out.push_str(&format!(
                "{pad}{} += {};\n",
                self.format_node(target),
                self.format_node(value)
            )),
            Stmt::Call(name, args) => out.push_str(&format!("{pad}{name}({});\n", self.join(args))),
            Stmt::ForRange {
                index,
                begin,
                end,
                body,
            } => {
                out.push_str(&format!(
                    "{pad}for (int {index} = {}; {index} < {}; ++{index})\n{pad}{{\n",
                    self.format_node(begin),
                    self.format_node(end)
                ));
                out.push_str(&self.format_statements(body, depth + 1));
                out.push_str(&format!("{pad}}}\n"));
            }
            Stmt::Scope(body) => {
                out.push_str(&format!("{pad}{{\n"));
                out.push_str(&self.format_statements(body, depth + 1));
                out.push_str(&format!("{pad}}}\n"));
            }
            Stmt::Zero { name, size } => {
                out.push_str(&format!("{pad}memset({name}, 0, {size} * sizeof(*{name}));\n"));
            }
        }
    }
}

impl Language for CLanguage {
    fn format_node(&self, node: &Node) -> String {
        let p = precedence(node);
        match node {
            Node::LiteralFloat(v) => format_float(*v, self.precision),
            Node::LiteralInt(v) => v.to_string(),
            Node::Symbol(name) => name.clone(),
            Node::ArrayAccess(array, indices) => {
                let subscripts: String = indices
                    .iter()
                    .map(|i| format!("[{}]", self.format_node(i)))
                    .collect();
                format!("{}{subscripts}", self.operand(array, POSTFIX))
            }
            Node::Sum(a, b) => self.binary(a, "+", b, p),
            Node::Sub(a, b) => self.binary(a, "-", b, p),
            Node::Product(a, b) => self.binary(a, "*", b, p),
            Node::Division(a, b) => self.binary(a, "/", b, p),
            Node::Power(a, b) => format!("pow({}, {})", self.format_node(a), self.format_node(b)),
            Node::MathFunction(f, a) => format!("{}({})", function_name(*f), self.format_node(a)),
            Node::Comparison(op, a, b) => self.binary(a, op.symbol(), b, p),
            Node::Not(a) => format!("!{}", self.operand(a, p)),
            Node::And(a, b) => self.binary(a, "&&", b, p),
            Node::Or(a, b) => self.binary(a, "||", b, p),
            Node::Conditional(c, t, f) => format!(
                "{} ? {} : {}",
                self.operand(c, p + 1),
                self.operand(t, p + 1),
                self.operand(f, p)
            ),
            Node::Call(name, args) => format!("{name}({})", self.join(args)),
        }
    }

    fn format_statements(&self, statements: &[Stmt], depth: usize) -> String {
        let mut out = String::new();
        for stmt in statements {
            self.write_stmt(&mut out, stmt, depth);
        }
        out
    }

    fn format_function(&self, name: &str, integral_type: IntegralType, body: &[Stmt]) -> String {
        let (usings, body): (Vec<Stmt>, Vec<Stmt>) = body
            .iter()
            .cloned()
            .partition(|s| matches!(s, Stmt::Using(_)));
        let entity = match integral_type {
            IntegralType::Cell => "",
            IntegralType::ExteriorFacet => ", int facet",
            IntegralType::InteriorFacet => ", int facet_0, int facet_1",
            IntegralType::Vertex => ", int vertex",
        };
        let mut out = self.format_statements(&usings, 0);
        if !usings.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!(
            "void {name}(double* restrict A, const double* const* w, \
             const double* restrict coordinate_dofs{entity})\n{{\n"
        ));
        out.push_str(&self.format_statements(&body, 1));
        out.push_str("}\n");
        out
    }
}

// =============================================================================
// ACCESS
// =============================================================================

fn restriction_postfix(cx: &TerminalContext<'_>, restriction: Option<Restriction>) -> &'static str {
    match cx.integral_type {
        IntegralType::InteriorFacet => restriction.unwrap_or(Restriction::Positive).postfix(),
        _ => "",
    }
}

/// Local index of the entity the integral is evaluated on
fn entity_node(cx: &TerminalContext<'_>, restriction: Option<Restriction>) -> Node {
    match cx.integral_type {
        IntegralType::Cell => Node::int(0),
        IntegralType::ExteriorFacet => Node::symbol("facet"),
        IntegralType::InteriorFacet => {
            Node::symbol(format!("facet{}", restriction_postfix(cx, restriction)))
        }
        IntegralType::Vertex => Node::symbol("vertex"),
    }
}

fn coefficient_count(cx: &TerminalContext<'_>, id: FormArgumentId) -> Result<usize, CompileError> {
    match cx.form.get(id).map(|fa| fa.kind) {
        Some(FormArgumentKind::Coefficient { count }) => Ok(count),
        Some(FormArgumentKind::Argument { number }) => Err(CompileError::invalid_input(format!(
            "argument {number} accessed outside the dof loops"
        ))),
        None => Err(CompileError::invalid_input("form argument not in this context")),
    }
}

fn coefficient_name(cx: &TerminalContext<'_>, mt: &ModifiedTerminal, count: usize) -> String {
    let mut name = format!("w{count}_c{}", mt.flat_component);
    if !mt.derivatives.is_empty() {
        name.push_str("_d");
        for d in &mt.derivatives {
            name.push_str(&d.to_string());
        }
    }
    if mt.reference_value || mt.reference_derivatives {
        name.push_str("_r");
    }
    if mt.averaged.is_some() {
        name.push_str("_avg");
    }
    name.push_str(restriction_postfix(cx, mt.restriction));
    name
}

/// Access of the geometric quantity `quantity`, folding derivatives that are
/// known on affine cells
fn geometry_access(
    cx: &TerminalContext<'_>,
    quantity: GeometricQuantity,
    mt: &ModifiedTerminal,
) -> Result<Node, CompileError> {
    let cell = cx.form.cell();
    if !mt.derivatives.is_empty() {
        return match quantity {
            GeometricQuantity::SpatialCoordinate if !mt.reference_derivatives => {
                let value = match mt.derivatives[..] {
                    [d] if mt.component.first() == Some(&d) => 1.0,
                    _ => 0.0,
                };
                Ok(Node::LiteralFloat(value))
            }
            q if q.is_cellwise_constant(cell) => Ok(Node::LiteralFloat(0.0)),
            q => Err(CompileError::unsupported(format!(
                "derivative of geometric quantity {}",
                q.name()
            ))),
        };
    }
    let name = Node::symbol(format!(
        "{}{}",
        quantity.name(),
        restriction_postfix(cx, mt.restriction)
    ));
    Ok(if quantity.shape(cell).is_empty() {
        name
    } else {
        name.at(vec![Node::int(mt.flat_component)])
    })
}

/// Names and accesses of the C backend
#[derive(Debug, Clone, Copy, Default)]
pub struct CAccess;

impl AccessResolver for CAccess {
    fn modified_terminal(
        &self,
        cx: &TerminalContext<'_>,
        mt: &ModifiedTerminal,
        _range: Option<&TableRange>,
    ) -> Result<Node, CompileError> {
        match &mt.terminal {
            Terminal::Literal(literal) => Ok(Node::LiteralFloat(literal.component_value(&mt.component))),
            Terminal::Geometry(q) => geometry_access(cx, *q, mt),
            Terminal::FormArgument(id) => {
                let count = coefficient_count(cx, *id)?;
                Ok(Node::symbol(coefficient_name(cx, mt, count)))
            }
        }
    }

    fn table(
        &self,
        cx: &TerminalContext<'_>,
        mt: &ModifiedTerminal,
        range: &TableRange,
        point: Node,
        column: Node,
    ) -> Node {
        Node::symbol(range.name.clone()).at(vec![entity_node(cx, mt.restriction), point, column])
    }

    fn output(&self, flat: Node) -> Node {
        Node::symbol(self.output_name()).at(vec![flat])
    }

    fn output_name(&self) -> &'static str {
        "A"
    }

    fn weights_name(&self, num_points: usize) -> String {
        format!("weights{num_points}")
    }

    fn points_name(&self, num_points: usize) -> String {
        format!("points{num_points}")
    }

    fn point_index(&self) -> &'static str {
        "iq"
    }

    fn dof_index(&self, level: usize) -> String {
        format!("i{level}")
    }

    fn weight_name(&self) -> &'static str {
        "weight"
    }

    fn scratch_name(&self, varying: bool, num_points: usize) -> String {
        if varying {
            format!("sv{num_points}")
        } else {
            format!("sp{num_points}")
        }
    }
}

// =============================================================================
// DEFINITIONS
// =============================================================================

fn coordinate_dofs(cx: &TerminalContext<'_>, restriction: Option<Restriction>) -> Node {
    let cell = cx.form.cell();
    let dofs = Node::symbol("coordinate_dofs");
    match (cx.integral_type, restriction) {
        (IntegralType::InteriorFacet, Some(Restriction::Negative)) => {
            dofs.offset(cell.num_vertices() * cell.gdim)
        }
        _ => dofs,
    }
}

fn helper_name(cx: &TerminalContext<'_>, what: &str) -> String {
    let cell = cx.form.cell();
    format!("compute_{what}_{}_{}d", cell.name, cell.gdim)
}

fn jacobian(cx: &TerminalContext<'_>, restriction: Option<Restriction>) -> Definition {
    let cell = cx.form.cell();
    let name = format!("J{}", restriction_postfix(cx, restriction));
    Definition::new(
        name.clone(),
        vec![
            Stmt::double_array(name.clone(), vec![cell.gdim * cell.tdim]),
            Stmt::Call(
                helper_name(cx, "jacobian"),
                vec![Node::symbol(name), coordinate_dofs(cx, restriction)],
            ),
        ],
    )
}

fn determinant(cx: &TerminalContext<'_>, restriction: Option<Restriction>) -> Definition {
    let r = restriction_postfix(cx, restriction);
    let name = format!("detJ{r}");
    let call = Node::Call(
        helper_name(cx, "jacobian_determinant"),
        vec![Node::symbol(format!("J{r}"))],
    );
    Definition::new(name.clone(), vec![Stmt::const_double(name, call)])
}

fn inverse(cx: &TerminalContext<'_>, restriction: Option<Restriction>) -> Definition {
    let cell = cx.form.cell();
    let r = restriction_postfix(cx, restriction);
    let name = format!("K{r}");
    Definition::new(
        name.clone(),
        vec![
            Stmt::double_array(name.clone(), vec![cell.tdim * cell.gdim]),
            Stmt::Call(
                helper_name(cx, "jacobian_inverse"),
                vec![
                    Node::symbol(name),
                    Node::symbol(format!("detJ{r}")),
                    Node::symbol(format!("J{r}")),
                ],
            ),
        ],
    )
}

fn facet_determinant(cx: &TerminalContext<'_>, restriction: Option<Restriction>) -> Definition {
    let r = restriction_postfix(cx, restriction);
    let name = format!("facet_det{r}");
    let call = Node::Call(
        helper_name(cx, "facet_scaling_factor"),
        vec![Node::symbol(format!("J{r}")), entity_node(cx, restriction)],
    );
    Definition::new(name.clone(), vec![Stmt::const_double(name, call)])
}

fn require_facet(cx: &TerminalContext<'_>, quantity: GeometricQuantity) -> Result<(), CompileError> {
    match cx.integral_type {
        IntegralType::ExteriorFacet | IntegralType::InteriorFacet => Ok(()),
        other => Err(CompileError::invalid_input(format!(
            "{} is only defined on facets, not in a {} integral",
            quantity.name(),
            other.name()
        ))),
    }
}

fn geometry_definitions(
    cx: &TerminalContext<'_>,
    quantity: GeometricQuantity,
    restriction: Option<Restriction>,
) -> Result<Vec<Definition>, CompileError> {
    let cell = cx.form.cell();
    if !cell.affine {
        return Err(CompileError::unsupported(format!(
            "geometric quantity {} on non-affine cell {}",
            quantity.name(),
            cell.name
        )));
    }
    let r = restriction_postfix(cx, restriction);
    let defs = match quantity {
        GeometricQuantity::Jacobian => vec![jacobian(cx, restriction)],
        GeometricQuantity::JacobianDeterminant => {
            vec![jacobian(cx, restriction), determinant(cx, restriction)]
        }
        GeometricQuantity::JacobianInverse => vec![
            jacobian(cx, restriction),
            determinant(cx, restriction),
            inverse(cx, restriction),
        ],
        GeometricQuantity::FacetNormal => {
            require_facet(cx, quantity)?;
            let name = format!("n{r}");
            let normal = Definition::new(
                name.clone(),
                vec![
                    Stmt::double_array(name.clone(), vec![cell.gdim]),
                    Stmt::Call(
                        helper_name(cx, "facet_normal"),
                        vec![
                            Node::symbol(name),
                            Node::symbol(format!("J{r}")),
                            Node::symbol(format!("detJ{r}")),
                            entity_node(cx, restriction),
                        ],
                    ),
                ],
            );
            vec![jacobian(cx, restriction), determinant(cx, restriction), normal]
        }
        GeometricQuantity::CellVolume => {
            let name = format!("volume{r}");
            let value = Node::Product(
                Box::new(Node::MathFunction(
                    MathFunction::Abs,
                    Box::new(Node::symbol(format!("detJ{r}"))),
                )),
                Box::new(Node::LiteralFloat(cell.reference_volume())),
            );
            vec![
                jacobian(cx, restriction),
                determinant(cx, restriction),
                Definition::new(name.clone(), vec![Stmt::const_double(name, value)]),
            ]
        }
        GeometricQuantity::Circumradius => {
            let name = format!("circumradius{r}");
            let call = Node::Call(
                helper_name(cx, "circumradius"),
                vec![coordinate_dofs(cx, restriction)],
            );
            vec![Definition::new(name.clone(), vec![Stmt::const_double(name, call)])]
        }
        GeometricQuantity::FacetArea => {
            require_facet(cx, quantity)?;
            let name = format!("facet_area{r}");
            let value = Node::Product(
                Box::new(Node::symbol(format!("facet_det{r}"))),
                Box::new(Node::LiteralFloat(cell.reference_facet_volume())),
            );
            vec![
                jacobian(cx, restriction),
                facet_determinant(cx, restriction),
                Definition::new(name.clone(), vec![Stmt::const_double(name, value)]),
            ]
        }
        GeometricQuantity::SpatialCoordinate => {
            if cx.integral_type != IntegralType::Cell {
                return Err(CompileError::unsupported(format!(
                    "spatial coordinate in a {} integral",
                    cx.integral_type.name()
                )));
            }
            vec![jacobian(cx, restriction), spatial_coordinate(cx)]
        }
    };
    Ok(defs)
}

/// `x = x0 + J X` at the current quadrature point
fn spatial_coordinate(cx: &TerminalContext<'_>) -> Definition {
    let cell = cx.form.cell();
    let points = CAccess.points_name(cx.num_points);
    let mut statements = vec![Stmt::double_array("x", vec![cell.gdim])];
    for k in 0..cell.gdim {
        let origin = Node::symbol("coordinate_dofs").at(vec![Node::int(k)]);
        let value = (0..cell.tdim).fold(origin, |acc, j| {
            let jacobian = Node::symbol("J").at(vec![Node::int(k * cell.tdim + j)]);
            let point = Node::symbol(points.clone())
                .at(vec![Node::symbol(CAccess.point_index()), Node::int(j)]);
            Node::Sum(
                Box::new(acc),
                Box::new(Node::Product(Box::new(jacobian), Box::new(point))),
            )
        });
        statements.push(Stmt::Assign(
            Node::symbol("x").at(vec![Node::int(k)]),
            value,
        ));
    }
    Definition::new("x", statements)
}

fn coefficient_definitions(
    cx: &TerminalContext<'_>,
    mt: &ModifiedTerminal,
    id: FormArgumentId,
    range: Option<&TableRange>,
    varying: bool,
) -> Result<Vec<Definition>, CompileError> {
    let count = coefficient_count(cx, id)?;
    let name = coefficient_name(cx, mt, count);
    let offset = dof_offset(cx.form, mt);
    let dof = |index: Node| Node::symbol("w").at(vec![Node::int(count), index]);

    let statements = match range {
        None => vec![Stmt::const_double(
            name.clone(),
            dof(Node::int(mt.flat_component + offset)),
        )],
        Some(range) if range.is_empty() => {
            vec![Stmt::const_double(name.clone(), Node::LiteralFloat(0.0))]
        }
        Some(range) => {
            let point = if varying && mt.averaged.is_none() {
                Node::symbol(CAccess.point_index())
            } else {
                Node::int(0)
            };
            let table = CAccess.table(cx, mt, range, point, Node::symbol("ic"));
            let value = dof(Node::symbol("ic").offset(range.begin + offset));
            vec![
                Stmt::double(name.clone(), Some(Node::LiteralFloat(0.0))),
                Stmt::for_range(
                    "ic",
                    Node::int(0),
                    Node::int(range.len()),
                    vec![Stmt::AssignAdd(
                        Node::symbol(name.clone()),
                        Node::Product(Box::new(value), Box::new(table)),
                    )],
                ),
            ]
        }
    };
    Ok(vec![Definition::new(name, statements)])
}

/// Setup statements of the C backend
#[derive(Debug, Clone, Copy, Default)]
pub struct CDefinitions;

impl DefinitionsResolver for CDefinitions {
    fn modified_terminal(
        &self,
        cx: &TerminalContext<'_>,
        mt: &ModifiedTerminal,
        range: Option<&TableRange>,
        varying: bool,
    ) -> Result<Vec<Definition>, CompileError> {
        match &mt.terminal {
            Terminal::Literal(_) => Ok(Vec::new()),
            // Derivatives of geometry fold to literals in the access
            Terminal::Geometry(_) if !mt.derivatives.is_empty() => Ok(Vec::new()),
            Terminal::Geometry(q) => geometry_definitions(cx, *q, mt.restriction),
            Terminal::FormArgument(id) => coefficient_definitions(cx, mt, *id, range, varying),
        }
    }

    fn scale_factor(
        &self,
        cx: &TerminalContext<'_>,
    ) -> Result<(Vec<Definition>, Option<Node>), CompileError> {
        match cx.integral_type {
            IntegralType::Vertex => Ok((Vec::new(), None)),
            IntegralType::Cell => {
                let defs = geometry_definitions(cx, GeometricQuantity::JacobianDeterminant, None)?;
                let scale = Node::MathFunction(MathFunction::Abs, Box::new(Node::symbol("detJ")));
                Ok((defs, Some(scale)))
            }
            IntegralType::ExteriorFacet | IntegralType::InteriorFacet => {
                let restriction = Some(Restriction::Positive);
                let cell = cx.form.cell();
                if !cell.affine {
                    return Err(CompileError::unsupported(format!(
                        "facet integral on non-affine cell {}",
                        cell.name
                    )));
                }
                let defs = vec![jacobian(cx, restriction), facet_determinant(cx, restriction)];
                let name = format!("facet_det{}", restriction_postfix(cx, restriction));
                Ok((defs, Some(Node::symbol(name))))
            }
        }
    }

    fn using_declarations(&self) -> Vec<Stmt> {
        ["math.h", "string.h", "ufc_geometry.h"]
            .into_iter()
            .map(|header| Stmt::Using(header.to_owned()))
            .collect()
    }
}
