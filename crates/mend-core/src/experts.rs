//! Expert guide lifecycle: stack profiling, onboarding, relevance, revision.
//!
//! On project onboarding the repository is inspected for a tech-stack
//! profile (manifest files, frameworks, databases, deployment hints) and
//! one guide per profile entry is generated. Guides are consulted by the
//! fix generator and revised when their quality score collapses.

use std::path::Path;

use tracing::info;

use mend_state::{ExpertGuide, ExpertKind, ExpertStore, Issue, IssueKind, Project};

use crate::context::ServiceContext;
use crate::error::Result;
use crate::generate::ModelClient as _;

/// Derive the tech-stack profile for a repository checkout.
///
/// Detection is manifest-driven: which files exist and what they name.
pub fn profile_stack(root: &Path) -> Vec<ExpertKind> {
    let mut kinds = Vec::new();
    let read = |name: &str| std::fs::read_to_string(root.join(name)).unwrap_or_default();

    let cargo = read("Cargo.toml");
    if !cargo.is_empty() {
        kinds.push(ExpertKind::language("rust"));
        if cargo.contains("axum") {
            kinds.push(ExpertKind::framework("axum"));
        } else if cargo.contains("actix-web") {
            kinds.push(ExpertKind::framework("actix"));
        }
        if cargo.contains("sqlx") || cargo.contains("postgres") {
            kinds.push(ExpertKind::database("postgres"));
        } else if cargo.contains("rusqlite") {
            kinds.push(ExpertKind::database("sqlite"));
        }
    }

    let package = read("package.json");
    if !package.is_empty() {
        kinds.push(ExpertKind::language("javascript"));
        if package.contains("\"express\"") {
            kinds.push(ExpertKind::framework("express"));
        } else if package.contains("\"react\"") {
            kinds.push(ExpertKind::framework("react"));
        }
        if package.contains("\"pg\"") {
            kinds.push(ExpertKind::database("postgres"));
        }
    }

    let python = format!("{}{}", read("requirements.txt"), read("pyproject.toml"));
    if !python.is_empty() {
        kinds.push(ExpertKind::language("python"));
        if python.contains("django") {
            kinds.push(ExpertKind::framework("django"));
        } else if python.contains("flask") {
            kinds.push(ExpertKind::framework("flask"));
        }
    }

    if !read("go.mod").is_empty() {
        kinds.push(ExpertKind::language("go"));
    }

    if root.join("Dockerfile").exists() || root.join("docker-compose.yml").exists() {
        kinds.push(ExpertKind::deployment("docker"));
    }
    if root.join(".github/workflows").is_dir() {
        kinds.push(ExpertKind::deployment("github-actions"));
    }

    kinds.push(ExpertKind::testing());
    kinds.push(ExpertKind::security());
    kinds.push(ExpertKind::api());
    kinds
}

/// Generate and store one guide per profile entry. Bodies are generated
/// once; later improvements supersede rather than mutate.
pub async fn onboard(ctx: &ServiceContext, project: &Project) -> Result<Vec<ExpertGuide>> {
    let kinds = profile_stack(&project.root_path);
    let mut guides = Vec::new();

    for kind in kinds {
        if ctx
            .store
            .live_guide(&project.id, &kind)
            .await?
            .is_some()
        {
            continue;
        }
        let prompt = format!(
            "Write a concise engineering guide for the {kind} concerns of the \
             project {name} ({repo}). Cover conventions, common defects, and \
             how fixes should be shaped.",
            name = project.name,
            repo = project.repo_url,
        );
        let body = ctx.model.complete(&prompt).await?;
        let guide = ExpertGuide::new(project.id.clone(), kind.clone(), body);
        ctx.store.put_guide(guide.clone()).await?;
        info!(project = %project.id, kind = %kind, "expert guide created");
        guides.push(guide);
    }
    Ok(guides)
}

/// Map an issue to the guides worth consulting: the primary language
/// guide plus kind-specific expertise.
pub async fn relevant_guides(
    ctx: &ServiceContext,
    project: &Project,
    issue: &Issue,
) -> Result<Vec<ExpertGuide>> {
    let live = ctx.store.live_guides(&project.id).await?;

    let mut wanted: Vec<ExpertKind> = Vec::new();
    if let Some(language) = live
        .iter()
        .find(|g| g.kind.as_str().starts_with("language-"))
    {
        wanted.push(language.kind.clone());
    }
    match issue.kind {
        IssueKind::Security => wanted.push(ExpertKind::security()),
        IssueKind::ErrorHandling => wanted.push(ExpertKind::testing()),
        IssueKind::Architecture => wanted.push(ExpertKind::api()),
        IssueKind::Performance | IssueKind::Style | IssueKind::Smell | IssueKind::Other => {}
    }
    if issue.path.contains("migration") || issue.path.ends_with(".sql") {
        if let Some(db) = live.iter().find(|g| g.kind.as_str().starts_with("database-")) {
            wanted.push(db.kind.clone());
        }
    }

    let mut guides: Vec<ExpertGuide> = Vec::new();
    for kind in wanted {
        if let Some(guide) = live.iter().find(|g| g.kind == kind) {
            if !guides.iter().any(|g| g.id == guide.id) {
                guides.push(guide.clone());
            }
        }
    }
    Ok(guides)
}

/// Regenerate a collapsed guide: a new revision with recent failure
/// samples folded into the prompt, superseding the old one.
pub async fn revise_guide(
    ctx: &ServiceContext,
    project: &Project,
    guide: &ExpertGuide,
    failure_samples: &[String],
) -> Result<ExpertGuide> {
    let prompt = format!(
        "The previous {kind} guide for project {name} led to failed fixes.\n\
         Failures:\n{failures}\n\n\
         Previous guide:\n{body}\n\n\
         Write an improved replacement guide.",
        kind = guide.kind,
        name = project.name,
        failures = failure_samples.join("\n"),
        body = guide.body,
    );
    let body = ctx.model.complete(&prompt).await?;

    let mut revised = ExpertGuide::new(project.id.clone(), guide.kind.clone(), body);
    revised.revision = guide.revision + 1;
    ctx.store.put_guide(revised.clone()).await?;
    info!(project = %project.id, kind = %guide.kind, revision = revised.revision, "expert guide revised");
    Ok(revised)
}
