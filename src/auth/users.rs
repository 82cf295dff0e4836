use crate::{
    db::{from_document, to_document, DocumentStore, Filter, StoreError, USERS},
    model::user::User,
};

pub async fn find_by_email(store: &dyn DocumentStore, email: &str) -> Result<Option<User>, StoreError> {
    store
        .query(USERS, &Filter::new().eq("email", email))
        .await?
        .into_iter()
        .next()
        .map(from_document)
        .transpose()
}

pub async fn find_by_id(store: &dyn DocumentStore, id: &str) -> Result<Option<User>, StoreError> {
    store.get(USERS, id).await?.map(from_document).transpose()
}

pub async fn insert(store: &dyn DocumentStore, user: &User) -> Result<(), StoreError> {
    store.create(USERS, to_document(user)?).await?;
    Ok(())
}
