//! The relation graph: tuple storage and the reachability check behind
//! every access decision.
//!
//! A tuple `(object, relation, target)` grants the relation on the target
//! to the object. Group membership is expressed with the `#member`
//! sub-selector, so access granted to `group:7#member` applies to every
//! member of group 7, transitively through nested groups:
//!
//! user:alex -> member -> group:yellow#member -> administrator -> controller:<uuid>

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

use crate::names::{Tag, ALL_KINDS};
use crate::utils::RELATION_READ_PAGE_SIZE;
use crate::{JimmError, JimmResult};

use super::Relation;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A relation between an object and a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationTuple {
    /// The object being granted the relation.
    pub object: Tag,

    /// The granted relation.
    pub relation: Relation,

    /// The resource the relation is granted on.
    pub target: Tag,
}

/// A partial tuple used to scan the graph. Any blank part matches
/// everything; a [`Tag::blank`] target matches every resource of its kind.
#[derive(Debug, Clone, Default)]
pub struct ReadPattern {
    /// Matches tuples with exactly this object, when set.
    pub object: Option<Tag>,

    /// Matches tuples with exactly this relation, when set.
    pub relation: Option<Relation>,

    /// Matches tuples with this target, when set. A blank tag matches by
    /// kind only.
    pub target: Option<Tag>,
}

/// One page of a tuple scan.
#[derive(Debug, Clone)]
pub struct ReadPage {
    /// The tuples matched on this page.
    pub tuples: Vec<RelationTuple>,

    /// Token to resume the scan, absent once exhausted.
    pub next_token: Option<String>,
}

/// Storage for relation tuples. Assumed linearizable; jimm adds no locking
/// around it.
#[async_trait]
pub trait TupleStore: Send + Sync {
    /// Stores the given tuples. Writing an existing tuple is a no-op.
    async fn write(&self, tuples: &[RelationTuple]) -> JimmResult<()>;

    /// Deletes the given tuples. Deleting a missing tuple is a no-op.
    async fn delete(&self, tuples: &[RelationTuple]) -> JimmResult<()>;

    /// Scans tuples matching the pattern, starting from the given
    /// continuation token.
    async fn read(
        &self,
        pattern: &ReadPattern,
        page_size: i64,
        token: Option<&str>,
    ) -> JimmResult<ReadPage>;
}

/// A tuple store backed by the catalog's `relation_tuples` table.
#[derive(Debug, Clone)]
pub struct SqliteTupleStore {
    pool: Pool<Sqlite>,
}

/// Answers "may object O act on target T via relation R" by traversing the
/// relation graph.
#[derive(Clone)]
pub struct AccessChecker {
    store: Arc<dyn TupleStore>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RelationTuple {
    /// Creates a tuple.
    pub fn new(object: Tag, relation: Relation, target: Tag) -> Self {
        RelationTuple {
            object,
            relation,
            target,
        }
    }
}

impl SqliteTupleStore {
    /// Creates a store over the given connection pool. The table is created
    /// by the catalog migrations.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        SqliteTupleStore { pool }
    }

    fn tuple_from_row(row: &SqliteRow) -> JimmResult<RelationTuple> {
        let object: String = row.try_get("object")?;
        let relation: String = row.try_get("relation")?;
        let target: String = row.try_get("target")?;
        Ok(RelationTuple {
            object: object.parse()?,
            relation: relation.parse()?,
            target: target.parse()?,
        })
    }
}

impl AccessChecker {
    /// Creates a checker over the given tuple store.
    pub fn new(store: Arc<dyn TupleStore>) -> Self {
        AccessChecker { store }
    }

    /// Returns the underlying tuple store.
    pub fn store(&self) -> &Arc<dyn TupleStore> {
        &self.store
    }

    /// Checks whether the tuple's object reaches its target via the tuple's
    /// relation, traversing `#member` edges on groups. When `trace` is set
    /// the resolution path is returned alongside a positive answer.
    pub async fn check(
        &self,
        tuple: &RelationTuple,
        trace: bool,
    ) -> JimmResult<(bool, Option<String>)> {
        // Walk the membership closure of the object: the object itself plus
        // every group-members set it transitively belongs to.
        let mut origin: HashMap<String, Option<String>> = HashMap::new();
        origin.insert(tuple.object.to_string(), None);
        let mut queue = vec![tuple.object.clone()];

        while let Some(subject) = queue.pop() {
            let pattern = ReadPattern {
                object: Some(subject.clone()),
                relation: Some(Relation::Member),
                target: None,
            };
            let mut token: Option<String> = None;
            loop {
                let page = self
                    .store
                    .read(&pattern, RELATION_READ_PAGE_SIZE, token.as_deref())
                    .await?;
                for membership in &page.tuples {
                    if !membership.target.is_group_members() {
                        continue;
                    }
                    let key = membership.target.to_string();
                    if !origin.contains_key(&key) {
                        origin.insert(key, Some(subject.to_string()));
                        queue.push(membership.target.clone());
                    }
                }
                token = page.next_token;
                if token.is_none() {
                    break;
                }
            }
        }

        // Any subject in the closure holding the relation on the target
        // grants access.
        for (subject, _) in origin.iter() {
            let pattern = ReadPattern {
                object: Some(subject.parse()?),
                relation: Some(tuple.relation),
                target: Some(tuple.target.clone()),
            };
            let page = self.store.read(&pattern, 1, None).await?;
            if page.tuples.is_empty() {
                continue;
            }
            let resolution = trace.then(|| {
                let mut path = vec![format!(
                    "{} -> {}",
                    tuple.relation, tuple.target
                )];
                let mut current = Some(subject.clone());
                while let Some(node) = current {
                    current = origin.get(&node).cloned().flatten();
                    let step = if current.is_some() {
                        format!("{} -> {}", Relation::Member, node)
                    } else {
                        node
                    };
                    path.push(step);
                }
                path.reverse();
                path.join(" -> ")
            });
            return Ok((true, resolution));
        }
        Ok((false, None))
    }

    /// Deletes every tuple matching the pattern, reading in pages to bound
    /// memory.
    pub async fn remove_matching(&self, pattern: &ReadPattern) -> JimmResult<()> {
        loop {
            let page = self
                .store
                .read(pattern, RELATION_READ_PAGE_SIZE, None)
                .await?;
            if page.tuples.is_empty() {
                return Ok(());
            }
            self.store.delete(&page.tuples).await?;
        }
    }

    /// Deletes every tuple referencing the given group, as object or as
    /// target, across all resource kinds.
    pub async fn remove_group(&self, group_id: i64) -> JimmResult<()> {
        // Membership edges into the group.
        self.remove_matching(&ReadPattern {
            object: None,
            relation: None,
            target: Some(Tag::group(group_id).with_relation(Relation::Member)),
        })
        .await?;
        self.remove_matching(&ReadPattern {
            object: None,
            relation: None,
            target: Some(Tag::group(group_id)),
        })
        .await?;
        // Grants held by the group's members on every resource kind.
        for kind in ALL_KINDS {
            self.remove_matching(&ReadPattern {
                object: Some(Tag::group(group_id).with_relation(Relation::Member)),
                relation: None,
                target: Some(Tag::blank(kind)),
            })
            .await?;
        }
        Ok(())
    }

    /// Deletes every tuple targeting the given resource.
    pub async fn remove_target(&self, target: Tag) -> JimmResult<()> {
        self.remove_matching(&ReadPattern {
            object: None,
            relation: None,
            target: Some(target),
        })
        .await
    }

    /// Returns the strongest of the candidate relations the object holds on
    /// the target, scanning strongest-first.
    pub async fn strongest_relation(
        &self,
        object: &Tag,
        candidates: &[Relation],
        target: &Tag,
    ) -> JimmResult<Option<Relation>> {
        for relation in candidates.iter().rev() {
            let tuple = RelationTuple::new(object.clone(), *relation, target.clone());
            let (allowed, _) = self.check(&tuple, false).await?;
            if allowed {
                return Ok(Some(*relation));
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for AccessChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessChecker").finish_non_exhaustive()
    }
}

impl Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.object, self.relation, self.target)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl TupleStore for SqliteTupleStore {
    async fn write(&self, tuples: &[RelationTuple]) -> JimmResult<()> {
        let mut tx = self.pool.begin().await?;
        for tuple in tuples {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO relation_tuples (object, relation, target)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(tuple.object.to_string())
            .bind(tuple.relation.to_string())
            .bind(tuple.target.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, tuples: &[RelationTuple]) -> JimmResult<()> {
        let mut tx = self.pool.begin().await?;
        for tuple in tuples {
            sqlx::query(
                r#"
                DELETE FROM relation_tuples
                WHERE object = ? AND relation = ? AND target = ?
                "#,
            )
            .bind(tuple.object.to_string())
            .bind(tuple.relation.to_string())
            .bind(tuple.target.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn read(
        &self,
        pattern: &ReadPattern,
        page_size: i64,
        token: Option<&str>,
    ) -> JimmResult<ReadPage> {
        let after: i64 = match token {
            Some(t) => t
                .parse()
                .map_err(|_| JimmError::BadRequest(format!("invalid page token {:?}", t)))?,
            None => 0,
        };

        let mut sql = String::from(
            "SELECT id, object, relation, target FROM relation_tuples WHERE id > ?",
        );
        let mut binds: Vec<String> = Vec::new();
        if let Some(object) = &pattern.object {
            sql.push_str(" AND object = ?");
            binds.push(object.to_string());
        }
        if let Some(relation) = &pattern.relation {
            sql.push_str(" AND relation = ?");
            binds.push(relation.to_string());
        }
        if let Some(target) = &pattern.target {
            if target.is_blank() {
                sql.push_str(" AND target LIKE ?");
                binds.push(format!("{}:%", target.kind.prefix()));
            } else {
                sql.push_str(" AND target = ?");
                binds.push(target.to_string());
            }
        }
        sql.push_str(" ORDER BY id LIMIT ?");

        let mut query = sqlx::query(&sql).bind(after);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.bind(page_size).fetch_all(&self.pool).await?;

        let mut tuples = Vec::with_capacity(rows.len());
        let mut last_id: i64 = after;
        for row in &rows {
            last_id = row.try_get("id")?;
            tuples.push(Self::tuple_from_row(row)?);
        }
        let next_token = (rows.len() as i64 == page_size).then(|| last_id.to_string());
        Ok(ReadPage { tuples, next_token })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
