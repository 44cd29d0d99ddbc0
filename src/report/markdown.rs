//! Markdown 渲染
//!
//! 每个章节对应一个阶段；阶段失败、跳过或未运行时保留章节标题并写明原因。

use std::fmt::{self, Write};

use crate::core::StageId;
use crate::report::ReportBundle;
use crate::schemas::tech_stack::feature_key;
use crate::schemas::{
    CodeAnalysisOutput, FeasibilityOutput, QualityAuditOutput, ResearchOutput, TechApproach,
    TechStackRecommendation, UxDesignOutput,
};
use crate::workflow::MergeReport;

use super::RankedRecommendations;

fn join_or(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join(", ")
    }
}

/// 表格单元格里的竖线与换行
fn cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

/// 章节不可用时写提示，返回 true
fn unavailable(out: &mut String, bundle: &ReportBundle, stage: StageId) -> Result<bool, fmt::Error> {
    match bundle.unavailable(stage) {
        Some(why) => {
            writeln!(out, "> **Unavailable:** {} {}.\n", stage, why)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn header(out: &mut String, bundle: &ReportBundle) -> fmt::Result {
    let cfg = &bundle.config;
    writeln!(out, "# Site Evolution Report: {}\n", cfg.display_name())?;
    writeln!(
        out,
        "*Generated: {} · run `{}`*\n",
        bundle.generated_at.format("%Y-%m-%d %H:%M UTC"),
        bundle.run_id
    )?;

    writeln!(out, "## Executive Summary\n")?;
    writeln!(out, "{}\n", bundle.executive_summary.trim())?;

    let incomplete: Vec<(StageId, String)> = StageId::ALL
        .iter()
        .filter_map(|s| bundle.unavailable(*s).map(|why| (*s, why)))
        .collect();
    if !incomplete.is_empty() {
        writeln!(out, "### Incomplete Stages\n")?;
        for (stage, why) in incomplete {
            writeln!(out, "- **{stage}**: {why}")?;
        }
        writeln!(out)?;
    }

    writeln!(out, "## Analysis Configuration\n")?;
    let na = |s: &str| if s.trim().is_empty() { "N/A".to_string() } else { s.to_string() };
    writeln!(out, "- **Target path:** {}", na(&cfg.target_path))?;
    writeln!(out, "- **Target URL:** {}", na(&cfg.target_url))?;
    writeln!(out, "- **Priorities:** {}", join_or(&cfg.priorities, "none"))?;
    if !cfg.constraints.must_keep.is_empty() {
        writeln!(out, "- **Must keep:** {}", cfg.constraints.must_keep.join(", "))?;
    }
    if !cfg.constraints.must_avoid.is_empty() {
        writeln!(out, "- **Must avoid:** {}", cfg.constraints.must_avoid.join(", "))?;
    }
    if !cfg.constraints.budget.is_empty() {
        writeln!(out, "- **Budget:** {}", cfg.constraints.budget)?;
    }
    writeln!(out)
}

fn research(out: &mut String, r: &ResearchOutput) -> fmt::Result {
    writeln!(out, "{}\n", r.summary)?;
    if !r.competitors.is_empty() {
        writeln!(out, "### Competitors Analyzed\n")?;
        for c in &r.competitors {
            writeln!(out, "#### {} ({})\n", c.name, c.url)?;
            if !c.relevance.is_empty() {
                writeln!(out, "*{}*\n", c.relevance)?;
            }
            for s in &c.strengths {
                writeln!(out, "- Strength: {s}")?;
            }
            for w in &c.weaknesses {
                writeln!(out, "- Weakness: {w}")?;
            }
            writeln!(out)?;
        }
    }

    if !r.feature_matrix.is_empty() {
        let names = r.competitor_names();
        writeln!(out, "### Feature Matrix\n")?;
        write!(out, "| Feature | Current site |")?;
        for n in &names {
            write!(out, " {} |", cell(n))?;
        }
        writeln!(out)?;
        writeln!(out, "|---|---|{}", "---|".repeat(names.len()))?;
        for row in &r.feature_matrix {
            write!(out, "| {} | {} |", cell(&row.feature), cell(&row.current_site))?;
            for n in &names {
                let v = row.competitors.get(n).map(String::as_str).unwrap_or("-");
                write!(out, " {} |", cell(v))?;
            }
            writeln!(out)?;
        }
        writeln!(out)?;
    }

    if !r.gaps.is_empty() {
        writeln!(out, "### Gaps Identified\n")?;
        for g in &r.gaps {
            writeln!(
                out,
                "- **[{}]** {} (user value: {}; seen in {}: {})",
                if g.severity.is_empty() { "unrated" } else { &g.severity },
                g.description,
                if g.user_value.is_empty() { "unrated" } else { &g.user_value },
                g.competitor_prevalence,
                join_or(&g.competitors_with_feature, "none"),
            )?;
        }
        writeln!(out)?;
    }

    if !r.ux_patterns.is_empty() {
        writeln!(out, "### UX Patterns Observed\n")?;
        for p in &r.ux_patterns {
            writeln!(out, "- **{}**: {} (seen in: {})", p.name, p.description, join_or(&p.seen_in, "-"))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn code_analysis(out: &mut String, c: &CodeAnalysisOutput) -> fmt::Result {
    writeln!(out, "{}\n", c.summary)?;
    if !c.tech_stack.is_empty() {
        writeln!(out, "### Tech Stack\n")?;
        writeln!(out, "| Technology | Category | Version | UX Pros | UX Cons |")?;
        writeln!(out, "|---|---|---|---|---|")?;
        for t in &c.tech_stack {
            writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                cell(&t.name),
                cell(&t.category),
                cell(&t.version),
                cell(&join_or(&t.ux_pros, "-")),
                cell(&join_or(&t.ux_cons, "-")),
            )?;
        }
        writeln!(out)?;
    }
    if !c.architecture.mermaid_diagram.trim().is_empty() {
        writeln!(out, "### Architecture Diagram\n")?;
        writeln!(out, "```mermaid\n{}\n```\n", c.architecture.mermaid_diagram.trim())?;
    }
    if !c.tech_debt.is_empty() {
        writeln!(out, "### Tech Debt\n")?;
        for d in &c.tech_debt {
            writeln!(out, "- **[{}]** {} ({})", d.severity, d.description, d.location)?;
            if !d.suggestion.is_empty() {
                writeln!(out, "  - Suggestion: {}", d.suggestion)?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

fn recommendations(out: &mut String, recs: &RankedRecommendations) -> fmt::Result {
    writeln!(out, "{}\n", recs.summary)?;
    let mut sorted: Vec<_> = recs.recommendations.iter().collect();
    sorted.sort_by_key(|r| r.rank);

    writeln!(out, "### Ranked Recommendations\n")?;
    for r in &sorted {
        writeln!(out, "#### #{}: {} (`{}`)\n", r.rank, r.title, r.id)?;
        writeln!(
            out,
            "**Category:** {} | **Complexity:** {}\n",
            if r.category.is_empty() { "-" } else { &r.category },
            if r.estimated_complexity.is_empty() { "-" } else { &r.estimated_complexity },
        )?;
        writeln!(out, "{}\n", r.description)?;
        if !r.rationale.is_empty() {
            writeln!(out, "*Rationale: {}*\n", r.rationale)?;
        }
        if r.parity_gap {
            writeln!(
                out,
                "**Competitive parity:** offered by {}\n",
                join_or(&r.competitors_with_feature, "competitors")
            )?;
        }
        let s = &r.scores;
        writeln!(
            out,
            "**Scores:** User Value {}/10 | Novelty {}/10 | Feasibility {}/10 | Accessibility {}/10\n",
            s.user_value, s.novelty, s.feasibility, s.accessibility_impact
        )?;
    }

    if !recs.quick_wins.is_empty() {
        writeln!(out, "### Quick Wins\n")?;
        for r in sorted.iter().filter(|r| recs.quick_wins.contains(&r.id)) {
            writeln!(out, "- **{}** (`{}`) {}", r.title, r.id, r.expected_impact)?;
        }
        writeln!(out)?;
    }
    if !recs.promoted.is_empty() || !recs.demoted.is_empty() {
        writeln!(
            out,
            "*Re-ranking promoted {} and demoted {}.*\n",
            join_or(&recs.promoted, "none"),
            join_or(&recs.demoted, "none")
        )?;
    }
    Ok(())
}

fn feasibility(out: &mut String, f: &FeasibilityOutput) -> fmt::Result {
    writeln!(out, "{}\n", f.summary)?;
    writeln!(out, "| Rec ID | Rating | Cost | Dev Days | Risk |")?;
    writeln!(out, "|---|---|---|---|---|")?;
    for a in &f.assessments {
        writeln!(
            out,
            "| {} | {} | {} | {} | {} |",
            cell(&a.recommendation_id),
            cell(&a.rating),
            cell(&a.cost_estimate),
            cell(&a.developer_days),
            cell(&a.risk),
        )?;
    }
    writeln!(out)
}

fn quality(out: &mut String, q: &QualityAuditOutput) -> fmt::Result {
    writeln!(out, "{}\n", q.summary)?;
    if !q.accessibility.wcag_level.is_empty() {
        writeln!(out, "**WCAG level:** {}\n", q.accessibility.wcag_level)?;
    }
    if !q.accessibility.issues.is_empty() {
        writeln!(out, "### Accessibility Issues\n")?;
        for i in &q.accessibility.issues {
            writeln!(out, "- **[{}]** {} (WCAG {})", i.severity, i.description, i.wcag_criterion)?;
            if !i.suggestion.is_empty() {
                writeln!(out, "  - Fix: {}", i.suggestion)?;
            }
        }
        writeln!(out)?;
    }
    if !q.performance.metrics.is_empty() {
        writeln!(out, "### Performance Metrics\n")?;
        writeln!(out, "| Metric | Value | Rating |")?;
        writeln!(out, "|---|---|---|")?;
        for m in &q.performance.metrics {
            writeln!(out, "| {} | {} | {} |", cell(&m.name), cell(&m.value), cell(&m.rating))?;
        }
        writeln!(out)?;
    }
    if !q.priority_issues.is_empty() {
        writeln!(out, "### Priority Issues\n")?;
        for i in &q.priority_issues {
            writeln!(out, "- **[{}]** {} ({}, effort: {})", i.impact, i.description, i.category, i.effort_to_fix)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn ux_design(out: &mut String, ux: &UxDesignOutput) -> fmt::Result {
    writeln!(out, "{}\n", ux.summary)?;
    if !ux.overall_impression.is_empty() {
        writeln!(out, "**Overall impression:** {}\n", ux.overall_impression)?;
    }
    if !ux.strengths.is_empty() {
        writeln!(out, "### Strengths\n")?;
        for s in &ux.strengths {
            writeln!(out, "- {s}")?;
        }
        writeln!(out)?;
    }

    let groups: [(&str, [(&str, &str); 4]); 4] = [
        (
            "Layout & Visual Hierarchy",
            [
                ("Visual hierarchy", ux.layout.visual_hierarchy.as_str()),
                ("Whitespace", ux.layout.whitespace_usage.as_str()),
                ("Grid", ux.layout.grid_consistency.as_str()),
                ("Responsive", ux.layout.responsive_notes.as_str()),
            ],
        ),
        (
            "Typography",
            [
                ("Readability", ux.typography.readability.as_str()),
                ("Hierarchy", ux.typography.hierarchy.as_str()),
                ("Consistency", ux.typography.consistency.as_str()),
                ("", ""),
            ],
        ),
        (
            "Color",
            [
                ("Palette", ux.color.palette_coherence.as_str()),
                ("Contrast", ux.color.contrast_notes.as_str()),
                ("Brand", ux.color.brand_consistency.as_str()),
                ("Dark mode", ux.color.dark_mode_notes.as_str()),
            ],
        ),
        (
            "Navigation",
            [
                ("Clarity", ux.navigation.clarity.as_str()),
                ("Information architecture", ux.navigation.information_architecture.as_str()),
                ("Mobile", ux.navigation.mobile_notes.as_str()),
                ("", ""),
            ],
        ),
    ];
    for (title, rows) in groups {
        let rows: Vec<_> = rows.iter().filter(|(_, v)| !v.trim().is_empty()).collect();
        if rows.is_empty() {
            continue;
        }
        writeln!(out, "### {title}\n")?;
        for (k, v) in rows {
            writeln!(out, "- **{k}:** {v}")?;
        }
        writeln!(out)?;
    }

    if !ux.issues.is_empty() {
        let order = |s: &str| match s {
            "critical" => 0,
            "major" => 1,
            "minor" => 2,
            "suggestion" => 3,
            _ => 4,
        };
        let mut issues: Vec<_> = ux.issues.iter().collect();
        issues.sort_by_key(|i| order(&i.severity));
        writeln!(out, "### Design Issues\n")?;
        for i in issues {
            writeln!(out, "- **[{} / {}]** {}", i.severity, i.area, i.description)?;
            if !i.recommendation.is_empty() {
                writeln!(out, "  - Recommendation: {}", i.recommendation)?;
            }
            if !i.competitors_doing_better.is_empty() {
                writeln!(out, "  - Done better by: {}", i.competitors_doing_better.join(", "))?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

fn approach(out: &mut String, kind: &str, a: &TechApproach) -> fmt::Result {
    writeln!(out, "#### {kind} approach: {}\n", a.description)?;
    writeln!(out, "| | |\n|---|---|")?;
    writeln!(out, "| **Stack** | {} |", cell(&join_or(&a.tech_stack, "-")))?;
    writeln!(out, "| **New dependencies** | {} |", cell(&join_or(&a.new_dependencies, "None")))?;
    writeln!(out, "| **Architecture fit** | {} |", cell(&a.architecture_fit))?;
    writeln!(out, "| **Effort** | {} |", cell(&a.effort_estimate))?;
    if !a.architecture_changes.is_empty() {
        writeln!(out, "| **Architecture changes** | {} |", cell(&a.architecture_changes.join(", ")))?;
    }
    if !a.pros.is_empty() {
        writeln!(out, "| **Pros** | {} |", cell(&a.pros.join(", ")))?;
    }
    if !a.cons.is_empty() {
        writeln!(out, "| **Cons** | {} |", cell(&a.cons.join(", ")))?;
    }
    writeln!(out)
}

fn tech_feature(out: &mut String, f: &TechStackRecommendation) -> fmt::Result {
    writeln!(out, "### {}\n", f.feature_name)?;
    if !f.requested_feature.is_empty() && feature_key(&f.requested_feature) != feature_key(&f.feature_name) {
        writeln!(out, "*Requested as: {}*\n", f.requested_feature)?;
    }
    if !f.parity_source.is_empty() {
        writeln!(
            out,
            "**Competitor parity:** {} already offer this feature.\n",
            f.parity_source.join(", ")
        )?;
    }
    if !f.current_stack_compatibility.is_empty() {
        writeln!(out, "{}\n", f.current_stack_compatibility)?;
    }
    for d in &f.diagrams {
        writeln!(out, "#### {}\n", d.title)?;
        if !d.summary.is_empty() {
            writeln!(out, "{}\n", d.summary)?;
        }
        let legend = [
            ("Keep", &d.components_to_keep),
            ("Issues", &d.components_with_issues),
            ("Modify", &d.components_to_modify),
            ("New", &d.new_components),
        ];
        for (label, items) in legend {
            if !items.is_empty() {
                writeln!(out, "- **{label}:** {}", items.join(", "))?;
            }
        }
        writeln!(out, "\n```mermaid\n{}\n```\n", d.mermaid)?;
    }
    approach(out, "Simple", &f.simple_approach)?;
    if let Some(c) = &f.comprehensive_approach {
        approach(out, "Comprehensive", c)?;
    }
    if !f.recommended_approach.is_empty() {
        writeln!(out, "**Recommendation:** {}. {}\n", f.recommended_approach, f.recommendation_rationale)?;
    }
    Ok(())
}

/// 写章节正文；阶段不可用时只写提示
fn section<T>(
    out: &mut String,
    bundle: &ReportBundle,
    stage: StageId,
    slot: Option<&T>,
    body: impl FnOnce(&mut String, &T) -> fmt::Result,
) -> fmt::Result {
    if unavailable(out, bundle, stage)? {
        return Ok(());
    }
    match slot {
        Some(value) => body(out, value),
        None => writeln!(out, "*No results recorded.*\n"),
    }
}

fn write_report(out: &mut String, bundle: &ReportBundle) -> fmt::Result {
    header(out, bundle)?;

    writeln!(out, "## Comparative Research\n")?;
    section(out, bundle, StageId::Research, bundle.research.as_ref(), research)?;

    writeln!(out, "## Code Analysis\n")?;
    section(out, bundle, StageId::CodeAnalysis, bundle.code_analysis.as_ref(), code_analysis)?;

    writeln!(out, "## Recommendations\n")?;
    match &bundle.recommendations {
        Some(recs) => {
            if recs.pass == 1 {
                unavailable(out, bundle, StageId::RankingPass2)?;
                writeln!(out, "*Showing the first-pass ranking.*\n")?;
            }
            recommendations(out, recs)?;
        }
        None => {
            unavailable(out, bundle, StageId::RankingPass1)?;
        }
    }

    writeln!(out, "## Feasibility Assessment\n")?;
    section(out, bundle, StageId::Feasibility, bundle.feasibility.as_ref(), feasibility)?;

    writeln!(out, "## Quality Audit\n")?;
    section(out, bundle, StageId::QualityAudit, bundle.quality_audit.as_ref(), quality)?;

    writeln!(out, "## UX & Design\n")?;
    section(out, bundle, StageId::DesignAudit, bundle.ux_design.as_ref(), ux_design)?;

    writeln!(out, "## Tech Stack Recommendations\n")?;
    section(out, bundle, StageId::TechStackAdvisor, bundle.tech_stack.as_ref(), |out, t| {
        writeln!(out, "{}\n", t.summary)?;
        t.features.iter().try_for_each(|f| tech_feature(out, f))
    })?;
    if !bundle.failed_features.is_empty() {
        writeln!(out, "> **Not evaluated:** {}\n", bundle.failed_features.join(", "))?;
    }

    if !bundle.screenshots.is_empty() {
        writeln!(out, "## Visual Evidence\n")?;
        for s in &bundle.screenshots {
            writeln!(out, "- {} ({} section(s))", s.url, s.tile_count)?;
        }
        writeln!(out)?;
    }

    writeln!(out, "---\n")?;
    writeln!(
        out,
        "*Tokens used: {} prompt / {} completion*",
        bundle.usage.prompt_tokens, bundle.usage.completion_tokens
    )
}

/// 渲染完整报告；失败或跳过的章节只写提示，不会出错
pub fn render_markdown(bundle: &ReportBundle) -> String {
    let mut out = String::new();
    // 写入 String 不会返回 Err
    let _ = write_report(&mut out, bundle);
    out
}

fn write_patch_report(
    out: &mut String,
    bundle: &ReportBundle,
    features: &[String],
    merge: &MergeReport,
) -> fmt::Result {
    let keys: Vec<String> = features.iter().map(|f| feature_key(f)).collect();
    writeln!(out, "# Tech Stack Update: {}\n", bundle.config.display_name())?;
    writeln!(
        out,
        "*Generated: {} · {} replaced, {} appended*\n",
        bundle.generated_at.format("%Y-%m-%d %H:%M UTC"),
        merge.replaced,
        merge.appended
    )?;
    if let Some(t) = &bundle.tech_stack {
        for f in t.features.iter().filter(|f| keys.contains(&f.merge_key())) {
            tech_feature(out, f)?;
        }
    }
    let failed: Vec<&str> = bundle
        .failed_features
        .iter()
        .filter(|f| keys.contains(&feature_key(f)))
        .map(String::as_str)
        .collect();
    if !failed.is_empty() {
        writeln!(out, "> **Not evaluated:** {}\n", failed.join(", "))?;
    }
    Ok(())
}

/// 增量运行的报告：只包含本次请求的功能
pub fn render_patch_report(bundle: &ReportBundle, features: &[String], merge: &MergeReport) -> String {
    let mut out = String::new();
    let _ = write_patch_report(&mut out, bundle, features, merge);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::core::{PipelineState, SkipReason, StageStatus};
    use crate::workflow::SYNTHESIS_FALLBACK;
    use serde_json::json;

    #[test]
    fn test_partial_state_flags_missing_sections() {
        let mut state = PipelineState::new(AnalysisConfig::new("./site", "https://example.com", vec!["speed".into()]));
        state.set_status(StageId::Research, StageStatus::Failed { reason: "rate limited".into() });
        state.set_status(
            StageId::DesignAudit,
            StageStatus::Skipped {
                reason: SkipReason::BlockedByFailedDependency(StageId::Research),
            },
        );
        state.code_analysis = Some(
            serde_json::from_value(json!({
                "tech_stack": [{"name": "React", "category": "framework", "version": 18}],
                "architecture": {"mermaid_diagram": "flowchart TD\n A-->B"},
                "summary": "SPA"
            }))
            .unwrap(),
        );
        state.set_status(StageId::CodeAnalysis, StageStatus::Succeeded);

        let md = render_markdown(&ReportBundle::from_state(&state));
        assert!(md.contains("# Site Evolution Report: https://example.com"));
        assert!(md.contains(SYNTHESIS_FALLBACK));
        assert!(md.contains("> **Unavailable:** Comparative Research (4A) failed: rate limited."));
        assert!(md.contains("UX Design Audit (4F) skipped (blocked by Comparative Research (4A))"));
        assert!(md.contains("| React | framework | 18 |"));
        assert!(md.contains("```mermaid\nflowchart TD"));
    }

    #[test]
    fn test_cell_escapes_pipes() {
        assert_eq!(cell("a|b\nc"), "a\\|b c");
    }
}
