//! Typed calls for the backend's CRUD endpoints.

use std::marker::PhantomData;

use reqwest::Method;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;

use crate::{
    client::{ApiClient, RequestOptions},
    error::Result,
    models::{Client, FinancialReport, PageResponse, Product, Sale, SaleReportRequest, SaleRequest},
};

pub const CLIENTS_PATH: &str = "/api/clients";
pub const PRODUCTS_PATH: &str = "/api/products";
pub const SALES_PATH: &str = "/api/vendas";

pub const DEFAULT_PAGE_SIZE: u32 = 10;

fn page_path(base: &str, page: u32, size: u32) -> String {
    format!("{base}?page={page}&size={size}")
}

/// A plain REST collection: paged listing plus get/create/update/delete by id.
pub struct Resource<T> {
    client: ApiClient,
    path: &'static str,
    _item: PhantomData<fn() -> T>,
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            path: self.path,
            _item: PhantomData,
        }
    }
}

impl<T> Resource<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(client: ApiClient, path: &'static str) -> Self {
        Self {
            client,
            path,
            _item: PhantomData,
        }
    }

    pub fn path(&self) -> &str {
        self.path
    }

    pub async fn list(&self, page: u32, size: u32) -> Result<PageResponse<T>> {
        self.client.get(&page_path(self.path, page, size)).await
    }

    pub async fn get(&self, id: i64) -> Result<T> {
        self.client.get(&format!("{}/{id}", self.path)).await
    }

    pub async fn create(&self, item: &T) -> Result<T> {
        self.client.post(self.path, item).await
    }

    pub async fn update(&self, id: i64, item: &T) -> Result<T> {
        self.client.put(&format!("{}/{id}", self.path), item).await
    }

    /// Deletes the item; whatever the backend answers is discarded.
    pub async fn delete(&self, id: i64) -> Result<()> {
        self.client
            .request_value(
                Method::DELETE,
                &format!("{}/{id}", self.path),
                None,
                RequestOptions::default(),
            )
            .await
            .map(|_| ())
    }
}

pub type Clients = Resource<Client>;
pub type Products = Resource<Product>;

/// Sales use their own request shape and action-style endpoints.
#[derive(Clone)]
pub struct Sales {
    client: ApiClient,
}

impl Sales {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self, page: u32, size: u32) -> Result<PageResponse<Sale>> {
        self.client.get(&page_path(SALES_PATH, page, size)).await
    }

    pub async fn get(&self, id: i64) -> Result<Sale> {
        self.client.get(&format!("{SALES_PATH}/{id}")).await
    }

    pub async fn create(&self, sale: &SaleRequest) -> Result<Sale> {
        self.client.post(SALES_PATH, sale).await
    }

    pub async fn update(&self, id: i64, sale: &SaleRequest) -> Result<Sale> {
        self.client
            .put(&format!("{SALES_PATH}/editar/{id}"), sale)
            .await
    }

    pub async fn cancel(&self, id: i64) -> Result<Sale> {
        self.client
            .put(&format!("{SALES_PATH}/cancelar/{id}"), &json!({}))
            .await
    }

    pub async fn report(&self, request: &SaleReportRequest) -> Result<Vec<Sale>> {
        self.client
            .post(&format!("{SALES_PATH}/relatorio"), request)
            .await
    }

    pub async fn financial_report(&self, request: &SaleReportRequest) -> Result<FinancialReport> {
        self.client
            .post(&format!("{SALES_PATH}/relatorio-financeiro"), request)
            .await
    }
}
