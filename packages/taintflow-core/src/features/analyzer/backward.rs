//! Backward model derivation
//!
//! Reads the forward pass's marker flows back into the callable's own
//! model: markers that reached a callee sink become sink-tree entries,
//! markers in the returned value become `LocalReturn` taint-in-taint-out,
//! and markers that ended up inside another parameter's final state become
//! `ParameterUpdate` entries.

use super::forward::{marker_param, PassOutput};
use super::AnalysisContext;
use crate::features::call_graph::Define;
use crate::features::source_env::ast::ParamKind;
use crate::features::taint::{
    FlowDetails, SourceTaint, TaintModel, TitoKind, TitoTaint, TitoTree,
};

pub(crate) fn derive_model(
    ctx: &AnalysisContext<'_>,
    define: &Define,
    previous: &TaintModel,
    output: &PassOutput,
) -> TaintModel {
    let mut model = previous.clone();
    let boundary = ctx.boundary_depth;

    // Forward: sources reaching the return value, markers excluded.
    let return_sources = output
        .return_taint
        .transform(&|e: &SourceTaint| e.filter_kinds(|k| marker_param(k).is_none()))
        .collapse_to(boundary);
    if !return_sources.is_bottom() {
        model.forward = model
            .forward
            .assign(&TaintModel::return_port(), &return_sources, true);
    }

    // Sinks: per-parameter trees collected at call sites, deterministic
    // port order.
    let mut sink_params: Vec<&String> = output.collected_sinks.keys().collect();
    sink_params.sort();
    for param in sink_params {
        let tree = output.collected_sinks[param].collapse_to(boundary.saturating_sub(1));
        model.backward.sink_tree =
            model
                .backward
                .sink_tree
                .assign(&TaintModel::param_port(param), &tree, true);
    }

    // Taint-in-taint-out: markers in the returned value.
    let returned = output.return_taint.collapse_all();
    for (kind, details) in returned.kinds() {
        let Some(param) = marker_param(kind) else {
            continue;
        };
        let element = TitoTaint::singleton(
            TitoKind::LocalReturn,
            FlowDetails {
                traces: [crate::features::taint::TraceInfo::declaration()]
                    .into_iter()
                    .collect(),
                breadcrumbs: details.breadcrumbs.clone(),
            },
        );
        model.backward.tito_tree = model.backward.tito_tree.assign(
            &TaintModel::param_port(param),
            &TitoTree::leaf(element),
            true,
        );
    }

    // Taint-in-taint-out: markers of one parameter that ended up in the
    // final state of another become parameter updates.
    let positional: Vec<&str> = define
        .def
        .params
        .iter()
        .filter(|p| {
            matches!(
                p.kind,
                ParamKind::Positional | ParamKind::PositionalOnly
            )
        })
        .map(|p| p.name.as_str())
        .collect();
    for (updated_index, updated_param) in positional.iter().enumerate() {
        let Some(final_tree) = output.final_state.get(*updated_param) else {
            continue;
        };
        for (kind, details) in final_tree.collapse_all().kinds() {
            let Some(origin) = marker_param(kind) else {
                continue;
            };
            if origin == *updated_param {
                continue;
            }
            let element = TitoTaint::singleton(
                TitoKind::ParameterUpdate(updated_index as u32),
                FlowDetails {
                    traces: [crate::features::taint::TraceInfo::declaration()]
                        .into_iter()
                        .collect(),
                    breadcrumbs: details.breadcrumbs.clone(),
                },
            );
            model.backward.tito_tree = model.backward.tito_tree.assign(
                &TaintModel::param_port(origin),
                &TitoTree::leaf(element),
                true,
            );
        }
    }

    model
}
