//! Startup catalog: gifts to seed and the users the directory knows about.

use anyhow::Context;
use raffle_execution::{Op, StaticDirectory, Store};
use raffle_types::{Contact, Gift, UserId};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub gifts: Vec<Gift>,
    #[serde(default)]
    pub users: Vec<CatalogUser>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CatalogUser {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl Catalog {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read catalog {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parse catalog {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let catalog: Catalog = serde_json::from_str(raw)?;
        for gift in &catalog.gifts {
            anyhow::ensure!(!gift.name.trim().is_empty(), "gift {} has no name", gift.id);
        }
        Ok(catalog)
    }

    pub fn directory(&self) -> StaticDirectory {
        self.users
            .iter()
            .map(|user| {
                (
                    user.id,
                    Contact {
                        name: user.name.clone(),
                        email: user.email.clone(),
                    },
                )
            })
            .collect()
    }

    /// Inserts catalog gifts the store does not know yet. Existing gifts are left alone so a
    /// restart never clears a `lottery_completed` flag. Returns the number inserted.
    pub async fn seed<S: Store>(&self, store: &S) -> anyhow::Result<usize> {
        let mut ops = Vec::new();
        for gift in &self.gifts {
            if store.gift(gift.id).await.context("look up gift")?.is_none() {
                ops.push(Op::PutGift(Gift {
                    lottery_completed: false,
                    ..gift.clone()
                }));
            }
        }
        let inserted = ops.len();
        if inserted > 0 {
            store.apply(ops).await.context("seed catalog gifts")?;
        }
        info!(
            inserted,
            known = self.gifts.len() - inserted,
            users = self.users.len(),
            "catalog loaded"
        );
        Ok(inserted)
    }
}
