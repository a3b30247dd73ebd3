use std::collections::HashMap;

use anyhow::Result;

use crate::models::SkillRow;
use crate::{Database, OptionalExt, id_list};

/// Lookups against the identity and skill-catalog collaborators' tables.
/// The exchange core never mutates skills; `insert_user`/`insert_skill`
/// exist for provisioning and tests.
impl Database {
    pub fn insert_user(&self, name: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO users (name) VALUES (?1)", [name])?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn user_name(&self, id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT name FROM users WHERE id = ?1", [id], |row| row.get(0))
                .optional()
        })
    }

    pub fn user_names(&self, ids: &[i64]) -> Result<HashMap<i64, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let list = id_list(ids);
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT id, name FROM users WHERE id IN ({list})"))?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<std::result::Result<HashMap<i64, String>, _>>()?)
        })
    }

    pub fn insert_skill(&self, user_id: i64, title: &str, description: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO skills (user_id, title, description) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, title, description],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn skills_by_ids(&self, ids: &[i64]) -> Result<Vec<SkillRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let list = id_list(ids);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, user_id, title, description FROM skills WHERE id IN ({list})"
            ))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(SkillRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        title: row.get(2)?,
                        description: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_and_skill_lookups() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.insert_user("Alice").unwrap();
        let bob = db.insert_user("Bob").unwrap();
        let skill = db.insert_skill(alice, "Guitar", "Strumming").unwrap();

        assert_eq!(db.user_name(alice).unwrap().as_deref(), Some("Alice"));
        assert_eq!(db.user_name(999).unwrap(), None);

        let names = db.user_names(&[alice, bob, 999]).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names[&bob], "Bob");

        let skills = db.skills_by_ids(&[skill, 424242]).unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].user_id, alice);
        assert_eq!(skills[0].title, "Guitar");
    }
}
