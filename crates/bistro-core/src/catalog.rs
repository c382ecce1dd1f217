use crate::error::BistroError;
use crate::storage::Store;
use crate::types::{Category, MenuItem};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Payload for creating a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryInput {
    pub slug: String,
    pub title: String,
}

/// Payload for creating a menu item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItemInput {
    pub title: String,
    pub price_minor: u64,
    #[serde(default)]
    pub featured: bool,
    pub category_id: i64,
}

/// Partial update for a menu item. Absent fields are left as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenuItemPatch {
    pub title: Option<String>,
    pub price_minor: Option<u64>,
    pub featured: Option<bool>,
    pub category_id: Option<i64>,
}

/// Listing filter. A category slug that resolves to nothing yields an empty
/// listing rather than an error.
#[derive(Debug, Clone, Default)]
pub struct MenuItemFilter {
    pub category_slug: Option<String>,
    pub featured: Option<bool>,
    pub max_price_minor: Option<u64>,
    /// Case-insensitive substring match on the title.
    pub search: Option<String>,
}

/// Listing order, parsed from the `ordering` query parameter form
/// (`price`, `-price`, `title`, `-title`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItemSort {
    PriceAsc,
    PriceDesc,
    TitleAsc,
    TitleDesc,
}

impl MenuItemSort {
    pub fn from_param(param: &str) -> Option<Self> {
        match param {
            "price" => Some(Self::PriceAsc),
            "-price" => Some(Self::PriceDesc),
            "title" => Some(Self::TitleAsc),
            "-title" => Some(Self::TitleDesc),
            _ => None,
        }
    }
}

/// Read/write access to the menu catalog. Pure CRUD with field validation;
/// role gating happens in the engine before calls land here.
pub struct CatalogStore {
    store: Arc<Store>,
}

impl CatalogStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn create_category(&self, input: CategoryInput) -> Result<Category, BistroError> {
        let slug = input.slug.trim().to_string();
        let title = input.title.trim().to_string();
        if slug.is_empty() {
            return Err(BistroError::validation("Slug must not be blank."));
        }
        if title.is_empty() {
            return Err(BistroError::validation("Title must not be blank."));
        }
        let category = self.store.insert_category(slug, title).await?;
        info!(category_id = category.id, slug = %category.slug, "category created");
        Ok(category)
    }

    pub async fn categories(&self) -> Vec<Category> {
        self.store.categories().await
    }

    pub async fn category(&self, id: i64) -> Result<Category, BistroError> {
        self.store
            .category(id)
            .await
            .ok_or_else(|| BistroError::not_found("Category not found."))
    }

    pub async fn create_menu_item(&self, input: MenuItemInput) -> Result<MenuItem, BistroError> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(BistroError::validation("Title must not be blank."));
        }
        if input.price_minor == 0 {
            return Err(BistroError::validation("Price must be greater than zero."));
        }
        if self.store.category(input.category_id).await.is_none() {
            return Err(BistroError::validation("Category does not exist."));
        }
        let item = self
            .store
            .insert_menu_item(title, input.price_minor, input.featured, input.category_id)
            .await?;
        info!(menu_item_id = item.id, title = %item.title, "menu item created");
        Ok(item)
    }

    pub async fn menu_item(&self, id: i64) -> Result<MenuItem, BistroError> {
        self.store
            .menu_item(id)
            .await
            .ok_or_else(|| BistroError::not_found("Menu item not found."))
    }

    pub async fn update_menu_item(
        &self,
        id: i64,
        patch: MenuItemPatch,
    ) -> Result<MenuItem, BistroError> {
        let mut item = self.menu_item(id).await?;
        if let Some(title) = patch.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(BistroError::validation("Title must not be blank."));
            }
            item.title = title;
        }
        if let Some(price_minor) = patch.price_minor {
            if price_minor == 0 {
                return Err(BistroError::validation("Price must be greater than zero."));
            }
            item.price_minor = price_minor;
        }
        if let Some(featured) = patch.featured {
            item.featured = featured;
        }
        if let Some(category_id) = patch.category_id {
            if self.store.category(category_id).await.is_none() {
                return Err(BistroError::validation("Category does not exist."));
            }
            item.category_id = category_id;
        }
        let item = self.store.update_menu_item(item).await?;
        info!(menu_item_id = item.id, "menu item updated");
        Ok(item)
    }

    pub async fn delete_menu_item(&self, id: i64) -> Result<(), BistroError> {
        if self.store.delete_menu_item(id).await? {
            info!(menu_item_id = id, "menu item deleted");
            Ok(())
        } else {
            Err(BistroError::not_found("Menu item not found."))
        }
    }

    pub async fn list_menu_items(
        &self,
        filter: &MenuItemFilter,
        sort: Option<MenuItemSort>,
    ) -> Result<Vec<MenuItem>, BistroError> {
        let mut items = self.store.menu_items().await;

        if let Some(slug) = &filter.category_slug {
            match self.store.category_by_slug(slug).await {
                Some(category) => items.retain(|item| item.category_id == category.id),
                None => return Ok(Vec::new()),
            }
        }
        if let Some(featured) = filter.featured {
            items.retain(|item| item.featured == featured);
        }
        if let Some(max) = filter.max_price_minor {
            items.retain(|item| item.price_minor <= max);
        }
        if let Some(needle) = &filter.search {
            let needle = needle.to_lowercase();
            items.retain(|item| item.title.to_lowercase().contains(&needle));
        }

        match sort {
            Some(MenuItemSort::PriceAsc) => items.sort_by_key(|item| item.price_minor),
            Some(MenuItemSort::PriceDesc) => {
                items.sort_by_key(|item| std::cmp::Reverse(item.price_minor))
            }
            Some(MenuItemSort::TitleAsc) => items.sort_by(|a, b| a.title.cmp(&b.title)),
            Some(MenuItemSort::TitleDesc) => items.sort_by(|a, b| b.title.cmp(&a.title)),
            None => {}
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;

    async fn setup() -> (CatalogStore, i64) {
        let store = Arc::new(Store::bootstrap(StorageConfig::memory()).await.unwrap());
        let catalog = CatalogStore::new(store);
        let category = catalog
            .create_category(CategoryInput {
                slug: "starters".to_string(),
                title: "Starters".to_string(),
            })
            .await
            .unwrap();
        (catalog, category.id)
    }

    fn item_input(title: &str, price_minor: u64, category_id: i64) -> MenuItemInput {
        MenuItemInput {
            title: title.to_string(),
            price_minor,
            featured: false,
            category_id,
        }
    }

    #[tokio::test]
    async fn rejects_zero_price() {
        let (catalog, category_id) = setup().await;
        let err = catalog
            .create_menu_item(item_input("Bruschetta", 0, category_id))
            .await
            .unwrap_err();
        assert!(matches!(err, BistroError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_unresolvable_category() {
        let (catalog, _) = setup().await;
        let err = catalog
            .create_menu_item(item_input("Bruschetta", 850, 404))
            .await
            .unwrap_err();
        assert!(matches!(err, BistroError::Validation(_)));
    }

    #[tokio::test]
    async fn patch_updates_only_present_fields() {
        let (catalog, category_id) = setup().await;
        let item = catalog
            .create_menu_item(item_input("Greek Salad", 1_200, category_id))
            .await
            .unwrap();

        let patch = MenuItemPatch {
            price_minor: Some(1_350),
            ..MenuItemPatch::default()
        };
        let updated = catalog.update_menu_item(item.id, patch).await.unwrap();
        assert_eq!(updated.price_minor, 1_350);
        assert_eq!(updated.title, "Greek Salad");
        assert!(!updated.featured);
    }

    #[tokio::test]
    async fn listing_filters_and_sorts() {
        let (catalog, starters) = setup().await;
        let desserts = catalog
            .create_category(CategoryInput {
                slug: "desserts".to_string(),
                title: "Desserts".to_string(),
            })
            .await
            .unwrap();
        catalog
            .create_menu_item(item_input("Bruschetta", 850, starters))
            .await
            .unwrap();
        catalog
            .create_menu_item(item_input("Tiramisu", 1_050, desserts.id))
            .await
            .unwrap();
        catalog
            .create_menu_item(item_input("Baklava", 900, desserts.id))
            .await
            .unwrap();

        let filter = MenuItemFilter {
            category_slug: Some("desserts".to_string()),
            ..MenuItemFilter::default()
        };
        let desserts_only = catalog
            .list_menu_items(&filter, Some(MenuItemSort::PriceDesc))
            .await
            .unwrap();
        assert_eq!(desserts_only.len(), 2);
        assert_eq!(desserts_only[0].title, "Tiramisu");

        let unknown = MenuItemFilter {
            category_slug: Some("drinks".to_string()),
            ..MenuItemFilter::default()
        };
        assert!(catalog.list_menu_items(&unknown, None).await.unwrap().is_empty());

        let search = MenuItemFilter {
            search: Some("bru".to_string()),
            ..MenuItemFilter::default()
        };
        let hits = catalog.list_menu_items(&search, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Bruschetta");
    }

    #[tokio::test]
    async fn delete_missing_item_is_not_found() {
        let (catalog, _) = setup().await;
        let err = catalog.delete_menu_item(7).await.unwrap_err();
        assert!(matches!(err, BistroError::NotFound(_)));
    }
}
