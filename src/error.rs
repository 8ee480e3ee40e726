#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Nenhuma mídia para download encontrada")]
    NoMediaFound,
    #[error("Falha ao resolver mídia: {0}")]
    ResolutionFailed(String),
    #[error("Tempo esgotado aguardando resposta da rede")]
    NetworkTimeout,
    #[error("URL de mídia não suportada: {0}")]
    UnsupportedUrlScheme(String),
    #[error("Falha ao despachar download: {0}")]
    DownloadDispatchFailed(String),
}
