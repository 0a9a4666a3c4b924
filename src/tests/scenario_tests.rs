//! End-to-end compiles of small forms, checked against the emitted C

use super::fixtures::{
    blocked_cell_tables, cell_tables, centroid, dg0, facet_midpoint, facet_tables, p1,
    three_point, triangle,
};
use crate::analysis::ScalarOp;
use crate::codegen::{Stmt, plan_dofblocks};
use crate::core::terminal::{FormArgument, Terminal};
use crate::{
    CompileError, ElementTables, EntityType, Expr, FormCompiler, FormContext, IntegralData,
    IntegralType, QuadratureRule, Table,
};

fn compile(
    ctx: &FormContext,
    integral_type: IntegralType,
    rule: QuadratureRule,
    integrand: Expr,
    tables: &ElementTables,
) -> Result<crate::CompiledIntegral, CompileError> {
    let data = IntegralData::new(integral_type).with_integrand(rule, integrand);
    FormCompiler::new().compile(ctx, &data, tables)
}

fn position(code: &str, needle: &str) -> usize {
    code.find(needle)
        .unwrap_or_else(|| panic!("`{needle}` not found in\n{code}"))
}

#[test]
fn test_constant_functional() {
    let ctx = FormContext::new(triangle());
    let compiled = compile(
        &ctx,
        IntegralType::Cell,
        QuadratureRule::single(vec![0.0, 0.0], 1.0),
        Expr::constant(1.0),
        &ElementTables::new(),
    )
    .unwrap();

    let expr_ir = &compiled.ir.groups[&1].expr_ir;
    let factors = &expr_ir.argument_factorization.factors;
    assert_eq!(factors.len(), 1);
    let factor = factors[&Vec::<usize>::new()];
    assert_eq!(expr_ir.vertices[factor].as_literal(), Some(1.0));

    let code = &compiled.code;
    assert!(code.contains("static const double weights1[1] = {1.0};"));
    assert!(code.contains("const double detJ = compute_jacobian_determinant_triangle_2d(J);"));
    assert!(code.contains("memset(A, 0, 1 * sizeof(*A));"));
    assert!(code.contains("const int iq = 0;"));
    assert!(code.contains("const double weight = weights1[iq] * fabs(detJ);"));
    assert!(code.contains("A[0] += weight;"));
    assert!(!code.contains("for (int iq"));
}

#[test]
fn test_mass_matrix_single_entry() {
    let element = dg0();
    let mut ctx = FormContext::new(triangle());
    let v = ctx.argument(0, element.clone());
    let u = ctx.argument(1, element.clone());
    let mut tables = ElementTables::new();
    tables.insert(&element, 0, &[0, 0], EntityType::Cell, Table::cell(vec![vec![1.0]])).unwrap();

    let compiled = compile(&ctx, IntegralType::Cell, centroid(), u * v, &tables).unwrap();

    let expr_ir = &compiled.ir.groups[&1].expr_ir;
    let af = &expr_ir.argument_factorization;
    assert_eq!(af.factors.len(), 1);
    let (tuple, &factor) = af.factors.iter().next().unwrap();
    assert_eq!(tuple.len(), 2);
    assert_eq!(af.modified_arguments[tuple[0]].number, 0);
    assert_eq!(af.modified_arguments[tuple[1]].number, 1);
    assert_eq!(expr_ir.vertices[factor].as_literal(), Some(1.0));

    let code = &compiled.code;
    assert_eq!(code.matches("for (int i0").count(), 1);
    assert_eq!(code.matches("for (int i1").count(), 1);
    assert!(code.contains("for (int i0 = 0; i0 < 1; ++i0)"));
    assert!(code.contains("A[i0 + i1] += weight * FE0_C0_D00_Q1_cell[0][iq][i0] * FE0_C0_D00_Q1_cell[0][iq][i1];"));
}

#[test]
fn test_derivative_of_cellwise_constant_is_piecewise() {
    let element = dg0();
    let mut ctx = FormContext::new(triangle());
    let f = ctx.coefficient(element.clone());
    let mut tables = ElementTables::new();
    tables.insert(&element, 0, &[1, 0], EntityType::Cell, Table::cell(vec![vec![2.0]])).unwrap();

    let integrand = ctx.dx(&f, 0);
    let compiled = compile(&ctx, IntegralType::Cell, centroid(), integrand, &tables).unwrap();

    let expr_ir = &compiled.ir.groups[&1].expr_ir;
    let class = &expr_ir.classification;
    assert!(class.varying.iter().all(|&v| !v));
    let terminal = expr_ir
        .vertices
        .iter()
        .position(|op| op.as_modified_terminal().is_some_and(|mt| mt.derivatives == [0]))
        .unwrap();
    assert!(class.active[terminal]);
    assert!(class.piecewise[terminal]);

    let code = &compiled.code;
    let definition = position(code, "double w0_c0_d0 = 0.0;");
    assert!(definition < position(code, "const int iq = 0;"));
    assert!(code.contains("w0_c0_d0 += w[0][ic] * FE0_C0_D10_Q1_cell[0][0][ic];"));
    assert!(code.contains("A[0] += weight * w0_c0_d0;"));
}

#[test]
fn test_p1_mass_matrix_point_loop() {
    let rule = three_point();
    let tables = cell_tables(&rule);
    let mut ctx = FormContext::new(triangle());
    let v = ctx.argument(0, p1());
    let u = ctx.argument(1, p1());

    let compiled = compile(&ctx, IntegralType::Cell, rule, u * v, &tables).unwrap();
    assert_eq!(compiled.ir.argument_dims, vec![3, 3]);

    let code = &compiled.code;
    assert!(code.contains("memset(A, 0, 9 * sizeof(*A));"));
    assert!(code.contains("for (int iq = 0; iq < 3; ++iq)"));
    assert!(code.contains("for (int i0 = 0; i0 < 3; ++i0)"));
    assert!(code.contains("A[i0 * 3 + i1] += weight * FE0_C0_D00_Q3_cell[0][iq][i0] * FE0_C0_D00_Q3_cell[0][iq][i1];"));
    assert!(position(code, "weights3") < position(code, "for (int iq"));
}

#[test]
fn test_varying_coefficient_is_inside_point_loop() {
    let rule = three_point();
    let tables = cell_tables(&rule);
    let mut ctx = FormContext::new(triangle());
    let v = ctx.argument(0, p1());
    let f = ctx.coefficient(p1());
    let c = ctx.constant();

    let integrand = (&c * &c + 1.0) * f * v;
    let compiled = compile(&ctx, IntegralType::Cell, rule, integrand, &tables).unwrap();
    let code = &compiled.code;

    let constant = position(code, "const double w1_c0 = w[1][0];");
    let point_loop = position(code, "for (int iq = 0; iq < 3; ++iq)");
    let coefficient = position(code, "double w0_c0 = 0.0;");
    assert!(constant < point_loop);
    assert!(point_loop < coefficient);
    assert!(position(code, "double sp3[") < point_loop);
    assert!(position(code, "double sv3[") > point_loop);
}

#[test]
fn test_gradient_uses_stripped_table() {
    let rule = centroid();
    let tables = cell_tables(&rule);
    let mut ctx = FormContext::new(triangle());
    let v = ctx.argument(0, p1());

    let compiled = compile(&ctx, IntegralType::Cell, rule, ctx.dx(&v, 0), &tables).unwrap();

    let code = &compiled.code;
    assert!(code.contains("static const double FE0_C0_D10_Q1_cell[1][1][2] = {"));
    assert!(code.contains("{-1.0, 1.0}"));
    assert!(code.contains("for (int i0 = 0; i0 < 2; ++i0)"));
    assert!(code.contains("A[i0] += weight * FE0_C0_D10_Q1_cell[0][iq][i0];"));
}

#[test]
fn test_exterior_facet_scale_factor() {
    let ctx = FormContext::new(triangle());
    let compiled = compile(
        &ctx,
        IntegralType::ExteriorFacet,
        facet_midpoint(),
        Expr::constant(1.0),
        &ElementTables::new(),
    )
    .unwrap();
    let code = &compiled.code;
    assert!(code.contains("const double* restrict coordinate_dofs, int facet)"));
    assert!(code.contains("compute_facet_scaling_factor_triangle_2d(J, facet)"));
    assert!(code.contains("const double weight = weights1[iq] * facet_det;"));
}

#[test]
fn test_interior_facet_jump() {
    let tables = facet_tables();
    let mut ctx = FormContext::new(triangle());
    let v = ctx.argument(0, p1());
    let jump = v.clone().plus() - v.minus();

    let compiled = compile(&ctx, IntegralType::InteriorFacet, facet_midpoint(), jump, &tables)
        .unwrap();
    assert_eq!(compiled.ir.argument_dims, vec![6]);

    let code = &compiled.code;
    assert!(code.contains("int facet_0, int facet_1)"));
    assert!(code.contains("memset(A, 0, 6 * sizeof(*A));"));
    assert!(code.contains("const double weight = weights1[iq] * facet_det_0;"));
    assert!(code.contains("for (int i0 = 0; i0 < 3; ++i0)"));
    assert!(code.contains("for (int i0 = 3; i0 < 6; ++i0)"));
    assert!(code.contains("FE0_C0_D00_Q1_facet[facet_0][iq][i0]"));
    assert!(code.contains("FE0_C0_D00_Q1_facet[facet_1][iq][i0 - 3]"));
}

#[test]
fn test_vertex_integral_has_no_scale() {
    let mut ctx = FormContext::new(triangle());
    let c = ctx.constant();
    let compiled = compile(
        &ctx,
        IntegralType::Vertex,
        QuadratureRule::single(vec![0.0, 0.0], 1.0),
        c,
        &ElementTables::new(),
    )
    .unwrap();
    let code = &compiled.code;
    assert!(code.contains("int vertex)"));
    assert!(code.contains("const double weight = weights1[iq];"));
    assert!(code.contains("A[0] += weight * w0_c0;"));
}

#[test]
fn test_two_point_counts_are_scoped() {
    let mut ctx = FormContext::new(triangle());
    let c = ctx.constant();
    let data = IntegralData::new(IntegralType::Cell)
        .with_integrand(centroid(), c.clone())
        .with_integrand(three_point(), c * 2.0);
    let compiled = FormCompiler::new()
        .compile(&ctx, &data, &ElementTables::new())
        .unwrap();

    assert_eq!(compiled.ir.groups.len(), 2);
    let scopes = compiled
        .statements
        .iter()
        .filter(|s| matches!(s, Stmt::Scope(_)))
        .count();
    assert_eq!(scopes, 2);
    let code = &compiled.code;
    assert!(position(code, "weights1[1]") < position(code, "weights3[3]"));
    assert_eq!(code.matches("memset").count(), 1);
}

#[test]
fn test_float_precision() {
    let ctx = FormContext::new(triangle());
    let data = IntegralData::new(IntegralType::Cell)
        .with_integrand(QuadratureRule::single(vec![0.0, 0.0], 1.0 / 3.0), Expr::constant(1.0));
    let compiled = FormCompiler::new()
        .float_precision(Some(4))
        .compile(&ctx, &data, &ElementTables::new())
        .unwrap();
    assert!(compiled.code.contains("weights1[1] = {0.3333};"));
}

#[test]
fn test_spatial_coordinate_reads_points() {
    let rule = three_point();
    let tables = cell_tables(&rule);
    let mut ctx = FormContext::new(triangle());
    let v = ctx.argument(0, p1());
    let x = ctx.spatial_coordinate();

    let compiled = compile(&ctx, IntegralType::Cell, rule, x.index_fixed(&[0]) * v, &tables)
        .unwrap();
    let code = &compiled.code;
    assert!(code.contains("static const double points3[3][2]"));
    assert!(code.contains("double x[2];"));
    assert!(code.contains("x[0] = coordinate_dofs[0] + J[0] * points3[iq][0] + J[1] * points3[iq][1];"));
}

#[test]
fn test_dof_blocks_stay_within_dimensions() {
    let tables = facet_tables();
    let mut ctx = FormContext::new(triangle());
    let v = ctx.argument(0, p1());
    let u = ctx.argument(1, p1());
    let integrand = (u.clone().plus() - u.minus()) * (v.clone().plus() + v.minus());
    let compiled = compile(&ctx, IntegralType::InteriorFacet, facet_midpoint(), integrand, &tables)
        .unwrap();

    let expr_ir = &compiled.ir.groups[&1].expr_ir;
    let blocks = plan_dofblocks(&ctx, expr_ir);
    assert_eq!(blocks.len(), 4);
    for block in blocks.keys() {
        for (range, &dim) in block.iter().zip(&compiled.ir.argument_dims) {
            assert!(!range.is_empty());
            assert!(range.end <= dim);
        }
    }
}

#[test]
fn test_missing_argument_table_fails_whole_integral() {
    let mut ctx = FormContext::new(triangle());
    let v = ctx.argument(0, p1());
    let err = compile(&ctx, IntegralType::Cell, centroid(), v, &ElementTables::new()).unwrap_err();
    assert!(matches!(err, CompileError::MissingTable(_)));
}

#[test]
fn test_factor_vertices_are_not_arguments() {
    let rule = centroid();
    let tables = cell_tables(&rule);
    let mut ctx = FormContext::new(triangle());
    let v = ctx.argument(0, p1());
    let f = ctx.coefficient(p1());
    let compiled = compile(&ctx, IntegralType::Cell, rule, (&f * &f) * v, &tables).unwrap();

    let expr_ir = &compiled.ir.groups[&1].expr_ir;
    for &factor in expr_ir.argument_factorization.factors.values() {
        let is_argument = match &expr_ir.vertices[factor] {
            ScalarOp::ModifiedTerminal(mt) => match mt.terminal {
                Terminal::FormArgument(id) => ctx.get(id).is_some_and(FormArgument::is_argument),
                _ => false,
            },
            _ => false,
        };
        assert!(!is_argument);
    }
}

#[test]
fn test_facet_integral_reads_facet_table_beside_cell_table() {
    let mut tables = facet_tables();
    let third = 1.0 / 3.0;
    tables
        .insert(&p1(), 0, &[0, 0], EntityType::Cell, Table::cell(vec![vec![third; 3]]))
        .unwrap();
    let mut ctx = FormContext::new(triangle());
    let v = ctx.argument(0, p1());

    let compiled = compile(&ctx, IntegralType::ExteriorFacet, facet_midpoint(), v, &tables).unwrap();

    let ir = &compiled.ir;
    assert_eq!(ir.unique_tables.len(), 1);
    assert_eq!(ir.unique_tables["FE0_C0_D00_Q1_facet"].num_entities(), 3);
    let code = &compiled.code;
    assert!(code.contains("static const double FE0_C0_D00_Q1_facet[3][1][3] = {"));
    assert!(code.contains("A[i0] += weight * FE0_C0_D00_Q1_facet[facet][iq][i0];"));
    assert!(!code.contains("_cell"));
}

#[test]
fn test_vector_component_writes_its_dof_block() {
    let rule = centroid();
    let tables = blocked_cell_tables(&rule);
    let mut ctx = FormContext::new(triangle());
    let v = ctx.argument(0, p1().vector(2));

    let compiled = compile(&ctx, IntegralType::Cell, rule, v.index_fixed(&[1]), &tables).unwrap();
    assert_eq!(compiled.ir.argument_dims, vec![6]);

    let code = &compiled.code;
    assert!(code.contains("memset(A, 0, 6 * sizeof(*A));"));
    assert!(code.contains("for (int i0 = 3; i0 < 6; ++i0)"));
    assert!(code.contains("A[i0] += weight * FE0_C0_D00_Q1_cell[0][iq][i0 - 3];"));
}
