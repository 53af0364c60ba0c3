use anyhow::Result as AnyResult;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::models::{PageType, SearchHit};

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub page_type: Option<PageType>,
    pub limit: Option<i64>,
}

/// Turn free text into an FTS5 query of quoted prefix terms.
///
/// `chest pain (adult)` becomes `"chest"* "pain"* "adult"*`, so user
/// punctuation never reaches the FTS5 parser. Returns `None` when no
/// searchable term remains.
pub fn fts_query(input: &str) -> Option<String> {
    let terms: Vec<String> = input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

/// Full-text search over active pages, best match first.
pub async fn search_pages(
    pool: &SqlitePool,
    query: &str,
    opts: &SearchOptions,
    max_limit: i64,
) -> Result<Vec<SearchHit>> {
    let match_expr = match fts_query(query) {
        Some(q) => q,
        None => return Ok(Vec::new()),
    };
    let limit = opts.limit.unwrap_or(20).clamp(1, max_limit.max(1));

    let mut sql = String::from(
        r#"
        SELECT p.id, p.slug, p.title, p.page_type,
               bm25(pages_fts, 0.0, 10.0, 1.0) AS rank,
               snippet(pages_fts, 2, '<mark>', '</mark>', '...', 16) AS snippet
        FROM pages_fts
        JOIN pages p ON p.id = pages_fts.page_id
        WHERE pages_fts MATCH ? AND p.deleted_at IS NULL
        "#,
    );
    if opts.page_type.is_some() {
        sql.push_str(" AND p.page_type = ?");
    }
    sql.push_str(" ORDER BY rank, p.title COLLATE NOCASE LIMIT ?");

    let mut q = sqlx::query(&sql).bind(&match_expr);
    if let Some(t) = opts.page_type {
        q = q.bind(t.as_str());
    }
    let rows = q.bind(limit).fetch_all(pool).await?;

    let mut hits = Vec::with_capacity(rows.len());
    let mut raw_scores = Vec::with_capacity(rows.len());
    for row in &rows {
        let rank: f64 = row.get("rank");
        let page_type: String = row.get("page_type");
        let title: String = row.get("title");
        let snippet: String = row.get("snippet");
        raw_scores.push(-rank); // bm25 is lower-is-better
        hits.push(SearchHit {
            id: row.get("id"),
            slug: row.get("slug"),
            page_type: page_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            score: 0.0,
            snippet: if snippet.trim().is_empty() {
                title.clone()
            } else {
                snippet
            },
            title,
        });
    }

    for (hit, score) in hits.iter_mut().zip(normalize_scores(&raw_scores)) {
        hit.score = score;
    }
    Ok(hits)
}

/// Min-max normalize scores to [0, 1]. A single hit (or all-equal hits)
/// scores 1.0.
fn normalize_scores(raw: &[f64]) -> Vec<f64> {
    let s_min = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    raw.iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

/// `scribe search`: print ranked hits to stdout.
pub async fn run_search(
    config: &Config,
    query: &str,
    page_type: Option<PageType>,
    limit: Option<i64>,
) -> AnyResult<()> {
    let pool = db::connect(config).await?;
    let opts = SearchOptions {
        page_type,
        limit: Some(limit.unwrap_or(config.pages.search_limit)),
    };
    let hits = search_pages(&pool, query, &opts, config.pages.max_search_limit).await?;

    if hits.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.2}] {} / {}", i + 1, hit.score, hit.page_type, hit.title);
        println!("    slug: {}", hit.slug);
        println!(
            "    excerpt: \"{}\"",
            hit.snippet
                .replace("<mark>", "")
                .replace("</mark>", "")
                .replace('\n', " ")
                .trim()
        );
        println!("    id: {}", hit.id);
        println!();
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pages::{self, NewPage};
    use tempfile::TempDir;

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(
            fts_query("Chest pain (adult)").as_deref(),
            Some("\"chest\"* \"pain\"* \"adult\"*")
        );
        assert_eq!(fts_query("\"OR\" NEAR(").as_deref(), Some("\"or\"* \"near\"*"));
        assert_eq!(fts_query("  -- ** "), None);
    }

    #[test]
    fn test_normalize_range() {
        let result = normalize_scores(&[10.0, 5.0, 0.0]);
        assert!((result[0] - 1.0).abs() < 1e-9);
        assert!((result[1] - 0.5).abs() < 1e-9);
        assert!((result[2] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        for score in normalize_scores(&[3.0, 3.0]) {
            assert!((score - 1.0).abs() < 1e-9);
        }
        assert!(normalize_scores(&[]).is_empty());
    }

    async fn seeded() -> (TempDir, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let pool = db::open_migrated(&tmp.path().join("search.sqlite"))
            .await
            .unwrap();
        let mut cp = NewPage::new("Chest Pain", PageType::Scenario);
        cp.content = serde_json::json!("Ask about onset, radiation and diaphoresis.");
        pages::create_page(&pool, cp, None, 3).await.unwrap();

        let mut ros = NewPage::new("ROS template", PageType::Smartphrase);
        ros.content = serde_json::json!("Denies chest pain, shortness of breath.");
        pages::create_page(&pool, ros, None, 3).await.unwrap();

        pages::create_page(&pool, NewPage::new("Suturing", PageType::Procedure), None, 3)
            .await
            .unwrap();
        (tmp, pool)
    }

    #[tokio::test]
    async fn test_search_ranks_title_matches_first() {
        let (_tmp, pool) = seeded().await;
        let hits = search_pages(&pool, "chest pain", &SearchOptions::default(), 100)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Chest Pain");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert!(hits[1].snippet.contains("<mark>"));
    }

    #[tokio::test]
    async fn test_search_prefix_and_type_filter() {
        let (_tmp, pool) = seeded().await;
        let opts = SearchOptions {
            page_type: Some(PageType::Smartphrase),
            limit: None,
        };
        let hits = search_pages(&pool, "diaph OR chest", &opts, 100).await.unwrap();
        assert!(hits.is_empty());

        let hits = search_pages(&pool, "diaph", &SearchOptions::default(), 100)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slug, "chest-pain");
    }

    #[tokio::test]
    async fn test_search_excludes_trashed_pages() {
        let (_tmp, pool) = seeded().await;
        let page = pages::get_page_by_slug(&pool, "suturing", false).await.unwrap();
        pages::soft_delete(&pool, &page.id, None).await.unwrap();
        let hits = search_pages(&pool, "suturing", &SearchOptions::default(), 100)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
