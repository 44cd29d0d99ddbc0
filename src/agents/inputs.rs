//! 各阶段的初始用户消息
//!
//! 上游结果在交给下游前先裁剪（代码分析去掉组件清单、推荐只留 id / 标题 / 分数等），
//! 控制上下文体积。缺失的上游以 null 出现，并在 `unavailable` 中列出。

use serde_json::{json, Value};

use crate::config::AnalysisConfig;
use crate::core::StageId;
use crate::memory::{ContentPart, Message};
use crate::react::image_parts;
use crate::schemas::tech_stack::feature_key;
use crate::schemas::{CodeAnalysisOutput, Pass1Output, Recommendation};
use crate::tools::{page_budget, ImageSequence};
use crate::workflow::{StageRequest, Upstream};

/// 全量运行时 4G 要评估的功能：配置中的功能在前，其后是 Pass 1 推荐标题，按规范化名称去重
pub fn features_for_run(config: &AnalysisConfig, pass1: Option<&Pass1Output>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    config
        .features
        .iter()
        .cloned()
        .chain(pass1.into_iter().flat_map(|p| p.recommendations.iter().map(|r| r.title.clone())))
        .filter(|f| !f.trim().is_empty() && seen.insert(feature_key(f)))
        .collect()
}

/// 已实现该功能的竞品（来自 Pass 1 中标记为 parity_gap 的推荐，标题互相包含即视为匹配）
pub fn parity_sources(pass1: Option<&Pass1Output>, feature: &str) -> Vec<String> {
    let wanted = feature.to_lowercase();
    let mut sources: Vec<String> = Vec::new();
    for rec in pass1.into_iter().flat_map(|p| &p.recommendations) {
        if !rec.parity_gap {
            continue;
        }
        let title = rec.title.to_lowercase();
        if title.contains(&wanted) || wanted.contains(&title) {
            for c in &rec.competitors_with_feature {
                if !sources.contains(c) {
                    sources.push(c.clone());
                }
            }
        }
    }
    sources
}

fn slim_recommendation(rec: &Recommendation) -> Value {
    json!({
        "id": rec.id,
        "title": rec.title,
        "category": rec.category,
        "rank": rec.rank,
        "scores": rec.scores,
    })
}

fn stack(code: Option<&CodeAnalysisOutput>) -> Value {
    code.map(|c| json!(c.stack_summary())).unwrap_or(Value::Null)
}

fn unavailable(up: &Upstream, wanted: &[StageId]) -> Vec<&'static str> {
    wanted
        .iter()
        .filter(|s| match s {
            StageId::Research => up.research.is_none(),
            StageId::CodeAnalysis => up.code_analysis.is_none(),
            StageId::RankingPass1 => up.pass1.is_none(),
            StageId::Feasibility => up.feasibility.is_none(),
            StageId::QualityAudit => up.quality_audit.is_none(),
            _ => false,
        })
        .map(|s| match s {
            StageId::Research => "research",
            StageId::CodeAnalysis => "code_analysis",
            StageId::RankingPass1 => "pass1",
            StageId::Feasibility => "feasibility",
            _ => "quality_audit",
        })
        .collect()
}

/// 汇总阶段的精简输入
pub fn synthesis_payload(config: &AnalysisConfig, up: &Upstream) -> Value {
    let (pass, recs, quick_wins, summary) = match (&up.pass2, &up.pass1) {
        (Some(p2), _) => (2, &p2.recommendations, &p2.quick_wins, &p2.summary),
        (None, Some(p1)) => (1, &p1.recommendations, &p1.quick_wins, &p1.summary),
        (None, None) => {
            return json!({
                "site": config.display_name(),
                "priorities": config.priorities,
                "recommendations": [],
                "research_summary": up.research.as_ref().map(|r| &r.summary),
                "code_summary": up.code_analysis.as_ref().map(|c| &c.summary),
                "incomplete_stages": incomplete(up),
            })
        }
    };
    json!({
        "site": config.display_name(),
        "priorities": config.priorities,
        "ranking_pass": pass,
        "recommendations": recs.iter().map(slim_recommendation).collect::<Vec<_>>(),
        "quick_wins": quick_wins,
        "summary": summary,
        "feasibility_summary": up.feasibility.as_ref().map(|f| &f.summary),
        "quality_summary": up.quality_audit.as_ref().map(|q| &q.summary),
        "research_summary": up.research.as_ref().map(|r| &r.summary),
        "code_summary": up.code_analysis.as_ref().map(|c| &c.summary),
        "tech_stack_summary": up.tech_stack.as_ref().map(|t| &t.summary),
        "ux_design_summary": up.ux_design.as_ref().map(|u| &u.summary),
        "incomplete_stages": incomplete(up),
    })
}

fn incomplete(up: &Upstream) -> Vec<Value> {
    up.unsuccessful
        .iter()
        .map(|(stage, reason)| json!({"stage": stage.label(), "reason": reason}))
        .collect()
}

/// 阶段输入 JSON
pub fn stage_input(request: &StageRequest) -> Value {
    let cfg = request.config.as_ref();
    let up = &request.upstream;
    match request.stage {
        StageId::Research => json!({
            "target_url": cfg.target_url,
            "target_path": cfg.target_path,
            "site_name": cfg.site_name,
            "site_description": cfg.site_description,
            "priorities": cfg.priorities,
            "competitor_urls": cfg.competitor_urls,
            "site_depth": cfg.site_depth,
            "page_budget": page_budget(cfg.site_depth),
            "known_issues": cfg.known_issues,
            "design_assets": cfg.design_assets,
        }),
        StageId::CodeAnalysis => json!({
            "target_path": cfg.target_path,
            "priorities": cfg.priorities,
            "constraints": cfg.constraints,
        }),
        StageId::RankingPass1 => json!({
            "priorities": cfg.priorities,
            "known_issues": cfg.known_issues,
            "user_feedback": cfg.user_feedback,
            "constraints": cfg.constraints,
            "research": up.research,
            "code_analysis": up.code_analysis.as_ref().map(CodeAnalysisOutput::slim),
            "unavailable": unavailable(up, &[StageId::Research, StageId::CodeAnalysis]),
        }),
        StageId::Feasibility => json!({
            "target_path": cfg.target_path,
            "constraints": cfg.constraints,
            "current_stack": stack(up.code_analysis.as_ref()),
            "architecture": up.code_analysis.as_ref().map(|c| &c.architecture),
            "recommendations": up.pass1.iter().flat_map(|p| &p.recommendations).map(|r| json!({
                "id": r.id,
                "title": r.title,
                "description": r.description,
                "estimated_complexity": r.estimated_complexity,
            })).collect::<Vec<_>>(),
        }),
        StageId::QualityAudit => json!({
            "target_url": cfg.target_url,
            "priorities": cfg.priorities,
            "known_issues": cfg.known_issues,
            "page_budget": page_budget(cfg.site_depth),
            "current_stack": stack(up.code_analysis.as_ref()),
            "recommendations": up.pass1.iter().flat_map(|p| &p.recommendations)
                .map(|r| json!({"id": r.id, "title": r.title}))
                .collect::<Vec<_>>(),
        }),
        StageId::TechStackAdvisor => {
            let feature = request.feature.clone().unwrap_or_default();
            let parity = parity_sources(up.pass1.as_ref(), &feature);
            json!({
                "features_to_evaluate": [{"feature_name": feature, "parity_source": parity}],
                "current_stack": up.code_analysis.as_ref().map(|c| json!({
                    "tech_stack": c.tech_stack,
                    "architecture": c.architecture,
                    "summary": c.summary,
                })),
                "constraints": cfg.constraints,
            })
        }
        StageId::RankingPass2 => json!({
            "priorities": cfg.priorities,
            "pass1": up.pass1,
            "feasibility": up.feasibility,
            "quality_audit": up.quality_audit.as_ref().map(|q| json!({
                "wcag_level": q.accessibility.wcag_level,
                "priority_issues": q.priority_issues,
                "summary": q.summary,
            })),
            "unavailable": unavailable(up, &[StageId::Feasibility, StageId::QualityAudit]),
        }),
        StageId::DesignAudit => json!({
            "site": cfg.display_name(),
            "target_url": cfg.target_url,
            "competitors": up.research.iter().flat_map(|r| &r.competitors)
                .map(|c| json!({"name": c.name, "url": c.url}))
                .collect::<Vec<_>>(),
            "ux_patterns": up.research.as_ref().map(|r| &r.ux_patterns),
            "screenshots": up.screenshots.iter()
                .map(|s| json!({"url": s.url, "sections": s.tile_count}))
                .collect::<Vec<_>>(),
        }),
        StageId::Synthesis => synthesis_payload(cfg, up),
    }
}

fn task_line(request: &StageRequest) -> String {
    match (request.stage, &request.feature) {
        (StageId::TechStackAdvisor, Some(feature)) => format!("Evaluate this feature: {feature}"),
        (StageId::Synthesis, _) => "Write the executive summary for these results.".to_string(),
        (StageId::DesignAudit, _) => {
            "Audit the design using the context below and the screenshots that follow.".to_string()
        }
        _ => format!("Analyse {} using the input below.", request.config.display_name()),
    }
}

/// 阶段的第一条用户消息；4F 附带截图切片
pub fn initial_message(request: &StageRequest, max_images_per_shot: usize) -> Message {
    let text = format!(
        "{}\n\nInput:\n```json\n{:#}\n```",
        task_line(request),
        stage_input(request)
    );
    if request.stage != StageId::DesignAudit || request.upstream.screenshots.is_empty() {
        return Message::user(text);
    }
    let mut parts = vec![ContentPart::Text { text }];
    for shot in &request.upstream.screenshots {
        let seq = ImageSequence {
            source: shot.url.clone(),
            tiles: shot.tiles.clone(),
        };
        parts.extend(image_parts(&seq, max_images_per_shot));
    }
    Message::user_parts(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pass1() -> Pass1Output {
        serde_json::from_value(json!({
            "recommendations": [
                {"id": "REC-001", "title": "Faceted Search", "description": "d", "parity_gap": true,
                 "competitors_with_feature": ["Acme", "Globex"]},
                {"id": "REC-002", "title": "Dark mode", "description": "d"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_features_dedup_case_insensitive() {
        let mut cfg = AnalysisConfig::new("/tmp", "", vec!["a".into()]);
        cfg.features = vec!["dark  MODE".into(), "Offline".into()];
        let features = features_for_run(&cfg, Some(&pass1()));
        assert_eq!(features, vec!["dark  MODE", "Offline", "Faceted Search"]);
    }

    #[test]
    fn test_parity_sources_match_by_containment() {
        let p = pass1();
        assert_eq!(parity_sources(Some(&p), "search"), vec!["Acme", "Globex"]);
        assert_eq!(parity_sources(Some(&p), "faceted search for products"), vec!["Acme", "Globex"]);
        assert!(parity_sources(Some(&p), "dark mode").is_empty());
        assert!(parity_sources(None, "search").is_empty());
    }

    #[test]
    fn test_tech_stack_input_shape() {
        let request = StageRequest {
            stage: StageId::TechStackAdvisor,
            config: Arc::new(AnalysisConfig::new("/tmp", "", vec!["a".into()])),
            upstream: Upstream {
                pass1: Some(pass1()),
                ..Upstream::default()
            },
            feature: Some("search".into()),
        };
        let input = stage_input(&request);
        assert_eq!(input["features_to_evaluate"][0]["feature_name"], "search");
        assert_eq!(input["features_to_evaluate"][0]["parity_source"], json!(["Acme", "Globex"]));
        assert!(input["current_stack"].is_null());
        assert!(initial_message(&request, 2).content.starts_with("Evaluate this feature: search"));
    }

    #[test]
    fn test_synthesis_payload_prefers_pass2_and_lists_gaps() {
        let up = Upstream {
            pass1: Some(pass1()),
            unsuccessful: vec![(StageId::QualityAudit, "timeout".into())],
            ..Upstream::default()
        };
        let cfg = AnalysisConfig::new("", "https://example.com", vec!["a".into()]);
        let payload = synthesis_payload(&cfg, &up);
        assert_eq!(payload["ranking_pass"], 1);
        assert_eq!(payload["recommendations"][0]["id"], "REC-001");
        assert!(payload["recommendations"][0].get("description").is_none());
        assert_eq!(payload["incomplete_stages"][0]["reason"], "timeout");
    }
}
