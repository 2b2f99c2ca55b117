use crate::errors::AppResult;

/// In-cluster config when running in a pod, kubeconfig otherwise.
pub async fn make_client() -> AppResult<kube::Client> {
    let client = kube::Client::try_default().await?;
    Ok(client)
}
