// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};

use crate::model::DEFAULT_ITEMS_PER_PAGE;

pub const MAX_VISIBLE_PAGE_LINKS: usize = 7;

/// Pagination cursor for one scope (flat view, a group, or a sub-group).
///
/// `current_page` is kept inside `[1, total_pages]` after every mutation so
/// a request built from the window never asks for a page past the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    current_page: usize,
    items_per_page: usize,
    total_items: usize,
}

impl Default for PageWindow {
    fn default() -> Self {
        Self::new(DEFAULT_ITEMS_PER_PAGE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLink {
    Page(usize),
    Gap,
}

impl PageWindow {
    pub fn new(items_per_page: usize) -> Self {
        Self {
            current_page: 1,
            items_per_page: items_per_page.max(1),
            total_items: 0,
        }
    }

    pub const fn current_page(&self) -> usize {
        self.current_page
    }

    pub const fn items_per_page(&self) -> usize {
        self.items_per_page
    }

    pub const fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn total_pages(&self) -> usize {
        self.total_items.div_ceil(self.items_per_page).max(1)
    }

    pub fn set_total_items(&mut self, total_items: usize) {
        self.total_items = total_items;
        self.clamp();
    }

    pub fn set_items_per_page(&mut self, items_per_page: usize) {
        self.items_per_page = items_per_page.max(1);
        self.current_page = 1;
        self.clamp();
    }

    /// Moves to `page`. Pages outside `[1, total_pages]` are rejected and the
    /// window keeps its current page.
    pub fn go_to_page(&mut self, page: usize) -> Result<()> {
        let total_pages = self.total_pages();
        if page == 0 || page > total_pages {
            bail!("page {page} is out of range; choose a page between 1 and {total_pages}");
        }
        self.current_page = page;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.current_page = 1;
    }

    pub fn clamp(&mut self) {
        self.current_page = self.current_page.clamp(1, self.total_pages());
    }

    pub fn request_page(&mut self) -> usize {
        self.clamp();
        self.current_page
    }

    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.total_pages()
    }

    pub fn item_range(&self) -> Option<(usize, usize)> {
        if self.total_items == 0 {
            return None;
        }
        let start = (self.current_page - 1) * self.items_per_page + 1;
        let end = (self.current_page * self.items_per_page).min(self.total_items);
        Some((start, end))
    }

    /// Page strip with ellipsis gaps, always showing the first and last page.
    pub fn page_links(&self, max_visible: usize) -> Vec<PageLink> {
        let total = self.total_pages();
        let current = self.current_page;
        let max_visible = max_visible.max(5);

        if total <= max_visible {
            return (1..=total).map(PageLink::Page).collect();
        }

        let mut links = vec![PageLink::Page(1)];
        if current <= 3 {
            links.extend((2..=max_visible - 2).map(PageLink::Page));
            links.push(PageLink::Gap);
        } else if current >= total - 2 {
            links.push(PageLink::Gap);
            links.extend((total + 3 - max_visible..total).map(PageLink::Page));
        } else {
            let start = (current - 1).max(3);
            let end = (current + 1).min(total - 1);
            links.push(PageLink::Gap);
            links.extend((start..=end).map(PageLink::Page));
            links.push(PageLink::Gap);
        }
        links.push(PageLink::Page(total));
        links
    }
}
